pub const SCHEMA: &str = r#"
-- People who can be enrolled and marked
CREATE TABLE IF NOT EXISTS people (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    role TEXT NOT NULL CHECK(role IN ('student', 'teacher')),
    class_name TEXT,              -- NULL for teachers
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_people_name ON people(name);
CREATE INDEX IF NOT EXISTS idx_people_role ON people(role);

-- Enrolled face embeddings; only active rows take part in matching
CREATE TABLE IF NOT EXISTS face_embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id INTEGER NOT NULL,
    embedding BLOB NOT NULL,          -- float32 array stored as little-endian bytes
    embedding_dim INTEGER NOT NULL,
    confidence REAL,                  -- Detection confidence of the enrollment capture
    notes TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    captured_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (person_id) REFERENCES people(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_face_embeddings_person ON face_embeddings(person_id);
CREATE INDEX IF NOT EXISTS idx_face_embeddings_active ON face_embeddings(is_active);

-- One attendance row per person per day
CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id INTEGER NOT NULL,
    date TEXT NOT NULL,               -- YYYY-MM-DD, local school day
    time TEXT NOT NULL,               -- HH:MM:SS, local time of marking
    status TEXT NOT NULL CHECK(status IN ('present', 'absent', 'leave')),
    source TEXT NOT NULL CHECK(source IN ('face', 'manual')),
    confidence REAL,                  -- Match confidence for face marks
    notes TEXT,
    marked_by TEXT,
    FOREIGN KEY (person_id) REFERENCES people(id) ON DELETE CASCADE,
    UNIQUE (person_id, date)
);

CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);

-- Every recognition attempt, matched or not
CREATE TABLE IF NOT EXISTS recognition_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id INTEGER,                -- NULL when nobody matched
    confidence REAL,
    matched INTEGER NOT NULL,
    attempted_at TEXT NOT NULL,       -- YYYY-MM-DD HH:MM:SS
    notes TEXT,
    FOREIGN KEY (person_id) REFERENCES people(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_recognition_attempts_at ON recognition_attempts(attempted_at);

-- Inbox captures already handled by the daemon, keyed by content hash
CREATE TABLE IF NOT EXISTS processed_captures (
    sha256 TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    faces_found INTEGER NOT NULL DEFAULT 0,
    marked INTEGER NOT NULL DEFAULT 0,
    processed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;
