use crate::board::io_json::JsonFileStore;
use crate::board::io_sqlite::SqliteStore;
use crate::board::session::*;
use crate::board::store::*;
use crate::board::*;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct StoreSource {
    pub provider: String,
    #[serde(rename = "filePath")]
    pub file_path: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RulesSettings {
    #[serde(rename = "writePath")]
    pub write_path: Option<String>,
    #[serde(rename = "logLimit")]
    pub log_limit: Option<JSValue>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    #[serde(rename = "boardName")]
    pub board_name: Option<String>,
    pub store: StoreSource,
    pub rules: Option<RulesSettings>,
}

impl BoardConfig {
    /// The configuration used when no file is given.
    pub fn in_memory() -> BoardConfig {
        BoardConfig {
            board_name: None,
            store: StoreSource {
                provider: "memory".to_string(),
                file_path: None,
            },
            rules: None,
        }
    }
}

pub fn read_config(path: &Path) -> BoardResult<BoardConfig> {
    let config: BoardConfig = read_json_file(path)?;
    info!("config: {:?}", config);
    Ok(config)
}

fn read_js_int(x: &JSValue) -> BoardResult<usize> {
    match x {
        JSValue::Number(n) => n.as_u64().map(|x| x as usize).context(ParsingJsonNumberSnafu {
            value: n.to_string(),
        }),
        JSValue::String(s) => s
            .trim()
            .parse::<usize>()
            .ok()
            .context(ParsingJsonNumberSnafu { value: s.clone() }),
        _ => None.context(ParsingJsonNumberSnafu {
            value: x.to_string(),
        }),
    }
}

pub fn validate_settings(rules: &Option<RulesSettings>) -> BoardResult<SessionSettings> {
    let mut settings = SessionSettings::DEFAULT;
    let rules = match rules {
        Some(r) => r,
        None => return Ok(settings),
    };
    settings.write_path = match rules.write_path.as_deref() {
        None | Some("readModifyWrite") => WritePath::ReadModifyWrite,
        Some("allocate") => WritePath::Allocate,
        Some(x) => {
            whatever!(
                "Unknown write path {:?}: expected readModifyWrite or allocate",
                x
            )
        }
    };
    if let Some(js) = &rules.log_limit {
        settings.log_limit = match read_js_int(js)? {
            0 => whatever!("logLimit must be at least 1"),
            x => x,
        };
    }
    Ok(settings)
}

fn resolve(root: &Path, file_path: Option<&str>, default_name: &str) -> PathBuf {
    let p = PathBuf::from(file_path.unwrap_or(default_name));
    if p.is_relative() {
        root.join(p)
    } else {
        p
    }
}

/// Opens the store named by a provider.
///
/// Relative paths are resolved from `root`, which is the directory of the
/// configuration file when there is one.
pub fn open_store(
    provider: &str,
    file_path: Option<&str>,
    root: &Path,
) -> BoardResult<Arc<dyn RowStore>> {
    let store: Arc<dyn RowStore> = match provider {
        "memory" => Arc::new(MemoryStore::new()),
        "json" => {
            let p = resolve(root, file_path, "board.json");
            debug!("open_store: json document at {:?}", p);
            Arc::new(JsonFileStore::open(&p)?)
        }
        "sqlite" => {
            let p = resolve(root, file_path, "board.sqlite");
            debug!("open_store: sqlite database at {:?}", p);
            Arc::new(SqliteStore::open(&p)?)
        }
        x => whatever!("Provider {:?} not supported (expected memory, json or sqlite)", x),
    };
    Ok(store)
}
