use std::path::{Path, PathBuf};

use refuge_core::RefugeResult;

use crate::{RefugeConfig, RefugeStore};

const DEFAULT_DB_NAME: &str = "refuge.sqlite";

pub fn load_or_init_config(base: &Path) -> RefugeResult<RefugeConfig> {
    let default_sqlite = base.join(DEFAULT_DB_NAME);
    RefugeConfig::load_or_init(base, &default_sqlite)
}

pub async fn open_store(base: &Path) -> RefugeResult<RefugeStore> {
    let config = load_or_init_config(base)?;
    RefugeStore::connect(&config, base).await
}

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_DB_NAME)
}
