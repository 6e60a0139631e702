//! Keyword embedding sets (SDG descriptions, AI terms).
//!
//! Stored as JSON `{ "<name>": [f32, ...] }`. SDG sets are ordered by the
//! goal number found in the name and their columns are prefixed `sdg_`; AI
//! term sets are ordered alphabetically and keep the term as column name.

use std::collections::HashMap;
use std::path::Path;

use ndarray::Array2;
use sdglens_core::{Error, Result};
use tracing::info;

use crate::similarity::normalize_rows;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordKind {
    Sdg,
    Ai,
}

/// Named keyword vectors, one row per keyword, rows L2-normalised.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    pub kind: KeywordKind,
    /// Keyword names as they appear in the source file.
    pub names: Vec<String>,
    pub matrix: Array2<f32>,
}

impl KeywordSet {
    pub fn from_map(kind: KeywordKind, map: HashMap<String, Vec<f32>>) -> Result<Self> {
        let mut names: Vec<String> = map.keys().cloned().collect();
        match kind {
            KeywordKind::Sdg => names.sort_by(|a, b| {
                goal_number(a).cmp(&goal_number(b)).then_with(|| a.cmp(b))
            }),
            KeywordKind::Ai => names.sort(),
        }

        let dim = names.first().map(|n| map[n].len()).unwrap_or(0);
        let mut flat = Vec::with_capacity(names.len() * dim);
        for name in &names {
            let v = &map[name];
            if v.len() != dim {
                return Err(Error::InvalidInput(format!(
                    "keyword {:?} has dimension {}, expected {}",
                    name,
                    v.len(),
                    dim
                )));
            }
            flat.extend_from_slice(v);
        }
        let mut matrix = Array2::from_shape_vec((names.len(), dim), flat)
            .map_err(|e| Error::Internal(e.to_string()))?;
        normalize_rows(&mut matrix);

        Ok(Self { kind, names, matrix })
    }

    pub fn load(path: &Path, kind: KeywordKind) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let map: HashMap<String, Vec<f32>> = serde_json::from_str(&content)?;
        let set = Self::from_map(kind, map)?;
        info!(
            "Loaded {} {:?} keywords (dim={}) from {}",
            set.len(),
            kind,
            set.dimension(),
            path.display()
        );
        Ok(set)
    }

    /// Score-table column names for this set.
    pub fn columns(&self) -> Vec<String> {
        match self.kind {
            KeywordKind::Sdg => self.names.iter().map(|n| format!("sdg_{}", n)).collect(),
            KeywordKind::Ai => self.names.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.matrix.ncols()
    }
}

/// Digits in an SDG key, e.g. `"SDG 7"` → 7. Keys without digits sort first.
fn goal_number(name: &str) -> u32 {
    let digits: String = name.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}
