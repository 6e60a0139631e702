//! Database schema SQL for the classification result store.

/// One row per classified sentence, keyed by document and chunk.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS classifications (
    company TEXT NOT NULL,
    year INTEGER NOT NULL,
    chunk_id INTEGER NOT NULL,
    custom_id TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    outcome TEXT NOT NULL,
    raw_output TEXT,
    sdg_labels TEXT,
    sdg_malformed INTEGER,
    ai_related INTEGER,
    sentiment TEXT,
    error TEXT,
    prompt_tokens INTEGER,
    completion_tokens INTEGER,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (company, year, chunk_id)
);

CREATE INDEX IF NOT EXISTS idx_classifications_batch ON classifications(batch_id);
CREATE INDEX IF NOT EXISTS idx_classifications_outcome ON classifications(outcome);
"#;

/// Last write wins on the `(company, year, chunk_id)` key.
pub const UPSERT_SQL: &str = r#"
INSERT INTO classifications (
    company, year, chunk_id, custom_id, batch_id, outcome, raw_output,
    sdg_labels, sdg_malformed, ai_related, sentiment, error,
    prompt_tokens, completion_tokens, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
ON CONFLICT (company, year, chunk_id) DO UPDATE SET
    custom_id = excluded.custom_id,
    batch_id = excluded.batch_id,
    outcome = excluded.outcome,
    raw_output = excluded.raw_output,
    sdg_labels = excluded.sdg_labels,
    sdg_malformed = excluded.sdg_malformed,
    ai_related = excluded.ai_related,
    sentiment = excluded.sentiment,
    error = excluded.error,
    prompt_tokens = excluded.prompt_tokens,
    completion_tokens = excluded.completion_tokens,
    updated_at = excluded.updated_at
"#;

pub const SELECT_COLUMNS: &str = "company, year, chunk_id, custom_id, batch_id, outcome, \
     raw_output, sdg_labels, sdg_malformed, ai_related, sentiment, error, \
     prompt_tokens, completion_tokens, updated_at";
