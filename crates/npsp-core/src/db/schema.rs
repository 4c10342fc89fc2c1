//! SQLite schema definition.

/// Complete database schema for the study platform.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Subjects (one row per enrolled animal)
-- ============================================================================

CREATE TABLE IF NOT EXISTS subjects (
    subject_id TEXT PRIMARY KEY,                 -- NPSP-C{code}-S{study}-M{sequence}
    site TEXT NOT NULL,
    center_code TEXT NOT NULL,
    study_number INTEGER NOT NULL CHECK (study_number >= 1),
    sequence_number INTEGER NOT NULL CHECK (sequence_number >= 1),
    sex TEXT NOT NULL CHECK (sex IN ('male', 'female')),
    planned_study_date TEXT NOT NULL,            -- YYYY-MM-DD
    delivery_date TEXT NOT NULL,                 -- YYYY-MM-DD
    metadata TEXT NOT NULL DEFAULT '{}',         -- JSON object, enrollment metadata
    form_completion TEXT NOT NULL DEFAULT '{}',  -- JSON object {stage: "completed"}
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (site, sequence_number)
);

CREATE INDEX IF NOT EXISTS idx_subjects_site_date ON subjects(site, planned_study_date);
CREATE INDEX IF NOT EXISTS idx_subjects_site_study ON subjects(site, study_number);

-- Identifiers are immutable once assigned
CREATE TRIGGER IF NOT EXISTS subjects_identity_immutable BEFORE UPDATE OF
    subject_id, site, center_code, study_number, sequence_number ON subjects
BEGIN
    SELECT RAISE(ABORT, 'Subject identity columns are immutable');
END;

-- ============================================================================
-- Form Entries (one row per subject, form, field)
-- ============================================================================

CREATE TABLE IF NOT EXISTS form_entries (
    subject_id TEXT NOT NULL REFERENCES subjects(subject_id),
    form TEXT NOT NULL,
    field TEXT NOT NULL,
    value TEXT NOT NULL,                         -- JSON value
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (subject_id, form, field)
);

CREATE INDEX IF NOT EXISTS idx_form_entries_form ON form_entries(form);

-- ============================================================================
-- Researchers (HQP accounts)
-- ============================================================================

CREATE TABLE IF NOT EXISTS researchers (
    researcher_id TEXT PRIMARY KEY,
    hqp_id TEXT NOT NULL UNIQUE,
    serial_number INTEGER NOT NULL UNIQUE CHECK (serial_number >= 1),
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash TEXT NOT NULL,
    password_salt TEXT NOT NULL,
    occupation TEXT,
    site TEXT,
    profile TEXT NOT NULL DEFAULT '{}',          -- JSON object
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
