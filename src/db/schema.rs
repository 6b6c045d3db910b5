pub const SCHEMA: &str = r#"
-- Projects: top-level consent context. Populated by the surrounding CRUD
-- layer; the pipeline only reads project membership.
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Cards: one ingest batch (a camera card / delivery) within a project.
CREATE TABLE IF NOT EXISTS cards (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
);

-- Card configs: anchor row for watch folders belonging to a card.
CREATE TABLE IF NOT EXISTS card_configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    card_id INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (card_id) REFERENCES cards(id) ON DELETE CASCADE
);

-- Watch folders: monitored directories feeding clips into a card.
CREATE TABLE IF NOT EXISTS watch_folders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    config_id INTEGER NOT NULL,
    folder_path TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'idle',  -- idle/scanned/active/error
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (config_id, folder_path),
    FOREIGN KEY (config_id) REFERENCES card_configs(id) ON DELETE CASCADE
);

-- Clips: one ingested video file tracked through the pipeline.
-- Filenames are unique per card; re-scanning updates, never duplicates.
CREATE TABLE IF NOT EXISTS clips (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    card_id INTEGER NOT NULL,
    watch_folder_id INTEGER,
    filename TEXT NOT NULL,
    path TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (card_id, filename),
    FOREIGN KEY (card_id) REFERENCES cards(id) ON DELETE CASCADE,
    FOREIGN KEY (watch_folder_id) REFERENCES watch_folders(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_clips_card_status ON clips(card_id, status);
CREATE INDEX IF NOT EXISTS idx_clips_watch_folder ON clips(watch_folder_id);

-- Frames: still images sampled from a clip, ordered by timecode.
CREATE TABLE IF NOT EXISTS frames (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    clip_id INTEGER NOT NULL,
    timestamp TEXT NOT NULL,              -- HH:MM:SS:FF timecode
    raw_image_path TEXT NOT NULL,
    processed_image_path TEXT,
    status TEXT NOT NULL DEFAULT 'queued',
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (clip_id) REFERENCES clips(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_frames_clip ON frames(clip_id);
CREATE INDEX IF NOT EXISTS idx_frames_status ON frames(status);

-- Detected faces: one face localized within a frame.
CREATE TABLE IF NOT EXISTS detected_faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    frame_id INTEGER NOT NULL,
    confidence REAL NOT NULL,
    bbox_x INTEGER NOT NULL,
    bbox_y INTEGER NOT NULL,
    bbox_w INTEGER NOT NULL,
    bbox_h INTEGER NOT NULL,
    embedding BLOB,           -- f32 little-endian array
    embedding_dim INTEGER,
    status TEXT NOT NULL DEFAULT 'queued',
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (frame_id) REFERENCES frames(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_detected_faces_frame ON detected_faces(frame_id);
CREATE INDEX IF NOT EXISTS idx_detected_faces_status ON detected_faces(status);

-- Face matches: detected face vs consent face at or below threshold.
-- Multiple matches per detection are allowed; ambiguity is surfaced, not
-- resolved.
CREATE TABLE IF NOT EXISTS face_matches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    detection_id INTEGER NOT NULL,
    consent_face_id INTEGER NOT NULL,
    distance REAL NOT NULL,
    threshold REAL NOT NULL,
    source_x INTEGER NOT NULL,
    source_y INTEGER NOT NULL,
    source_w INTEGER NOT NULL,
    source_h INTEGER NOT NULL,
    target_x INTEGER NOT NULL,
    target_y INTEGER NOT NULL,
    target_w INTEGER NOT NULL,
    target_h INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (detection_id) REFERENCES detected_faces(id) ON DELETE CASCADE,
    FOREIGN KEY (consent_face_id) REFERENCES consent_faces(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_face_matches_detection ON face_matches(detection_id);

-- Consent profiles: one person who has (or has not) signed a release.
CREATE TABLE IF NOT EXISTS consent_profiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    person_name TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_consent_profiles_project ON consent_profiles(project_id);

-- Consent faces: reference images with cached embeddings. The pipeline
-- regenerates an embedding whenever it is absent or the image file is
-- newer than last_updated.
CREATE TABLE IF NOT EXISTS consent_faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile_id INTEGER NOT NULL,
    image_path TEXT NOT NULL,
    pose_type TEXT NOT NULL DEFAULT 'frontal',
    embedding BLOB,
    embedding_dim INTEGER,
    last_updated TEXT,
    FOREIGN KEY (profile_id) REFERENCES consent_profiles(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_consent_faces_profile ON consent_faces(profile_id);

-- Processing tasks: one row per pipeline run. The row is also the
-- cancellation channel: stop requests set status to 'cancelling' and the
-- worker polls for it at item boundaries.
CREATE TABLE IF NOT EXISTS processing_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    card_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    stage TEXT,
    progress REAL NOT NULL DEFAULT 0.0,
    message TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (card_id) REFERENCES cards(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_processing_tasks_card ON processing_tasks(card_id, status);
"#;

/// Additive migrations applied after the base schema. Errors are ignored so
/// re-running "ALTER TABLE ... ADD COLUMN" on an up-to-date database is a
/// no-op.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE consent_faces ADD COLUMN pose_type TEXT NOT NULL DEFAULT 'frontal'",
    "ALTER TABLE clips ADD COLUMN error_message TEXT",
];
