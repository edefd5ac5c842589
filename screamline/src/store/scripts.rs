use redis::Script;
use std::sync::LazyLock;

pub const BATCH_COMMIT_SCRIPT_BODY: &str = include_str!("../../lua/batch_commit.lua");

pub static BATCH_COMMIT_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(BATCH_COMMIT_SCRIPT_BODY));
