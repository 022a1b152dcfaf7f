//! Database schema for the Sextant workspace database.
//!
//! The build graph (`build_actions`, `build_sources`, `build_targets`,
//! `files`) is written by the build-log import and read by the scheduler.
//! Parsers fill `includes` and `symbols`; the cluster engine writes `clusters`.

/// SQL schema for creating the workspace tables.
pub const SCHEMA_SQL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_build_actions START 1;
CREATE SEQUENCE IF NOT EXISTS seq_files START 1;

-- One row per recorded tool invocation
CREATE TABLE IF NOT EXISTS build_actions (
    id BIGINT PRIMARY KEY DEFAULT nextval('seq_build_actions'),
    type VARCHAR NOT NULL,
    state VARCHAR NOT NULL DEFAULT 'created',
    label VARCHAR NOT NULL,
    project VARCHAR NOT NULL
);

-- Every file the workspace knows about
CREATE TABLE IF NOT EXISTS files (
    id BIGINT PRIMARY KEY DEFAULT nextval('seq_files'),
    path VARCHAR NOT NULL UNIQUE,
    language VARCHAR
);

-- Inputs and outputs of build actions, ordered by ordinal
CREATE TABLE IF NOT EXISTS build_sources (
    action_id BIGINT NOT NULL,
    file_id BIGINT NOT NULL,
    ordinal INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS build_targets (
    action_id BIGINT NOT NULL,
    file_id BIGINT NOT NULL,
    ordinal INTEGER NOT NULL
);

-- includer_id textually includes included_id
CREATE TABLE IF NOT EXISTS includes (
    includer_id BIGINT NOT NULL,
    included_id BIGINT NOT NULL
);

-- Symbol occurrences recorded by parsers
CREATE TABLE IF NOT EXISTS symbols (
    mangled_hash BIGINT NOT NULL,
    name VARCHAR NOT NULL,
    kind VARCHAR NOT NULL,
    role VARCHAR NOT NULL,
    file_id BIGINT NOT NULL
);

-- Build actions a file's symbols may have been compiled into
CREATE TABLE IF NOT EXISTS clusters (
    file_id BIGINT NOT NULL,
    action_id BIGINT NOT NULL
);

-- Version-control roots found during discovery
CREATE TABLE IF NOT EXISTS repositories (
    path VARCHAR PRIMARY KEY,
    kind VARCHAR NOT NULL
);

-- Aggregate counters of the last run
CREATE TABLE IF NOT EXISTS statistics (
    category VARCHAR NOT NULL,
    key VARCHAR NOT NULL,
    value BIGINT NOT NULL,
    PRIMARY KEY (category, key)
);

-- Metadata table: version, run info
CREATE TABLE IF NOT EXISTS metadata (
    key VARCHAR PRIMARY KEY,
    value VARCHAR
);

CREATE INDEX IF NOT EXISTS idx_sources_action ON build_sources(action_id);
CREATE INDEX IF NOT EXISTS idx_sources_file ON build_sources(file_id);
CREATE INDEX IF NOT EXISTS idx_targets_action ON build_targets(action_id);
CREATE INDEX IF NOT EXISTS idx_targets_file ON build_targets(file_id);
CREATE INDEX IF NOT EXISTS idx_includes_includer ON includes(includer_id);
CREATE INDEX IF NOT EXISTS idx_includes_included ON includes(included_id);
CREATE INDEX IF NOT EXISTS idx_symbols_hash ON symbols(mangled_hash);
CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id);
"#;

/// Schema version recorded in `metadata`.
pub const SCHEMA_VERSION: &str = "1.0.0";
