use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const PLANK_DIR: &str = ".plank";

pub const CONFIG_FILE: &str = ".plank/config.yaml";
pub const STATE_FILE: &str = ".plank/state.yaml";
pub const DEAD_LETTERS_FILE: &str = ".plank/webhooks/dead_letters.jsonl";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn state_path(root: &Path) -> PathBuf {
    root.join(STATE_FILE)
}

pub fn dead_letters_path(root: &Path) -> PathBuf {
    root.join(DEAD_LETTERS_FILE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
