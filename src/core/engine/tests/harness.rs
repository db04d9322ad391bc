use std::sync::Arc;

use crate::core::cancel::CancelToken;
use crate::core::config::Config;
use crate::core::engine::{CloneOptions, ClonerEngine};
use crate::core::store::TaskStore;
use crate::core::telegram::mock::MockClient;
use crate::core::testutil::test_config;

pub(super) const ORIGIN: i64 = -1001111111111;
pub(super) const DEST: i64 = -1002222222222;

pub(super) struct EngineFixture {
    pub client: Arc<MockClient>,
    pub store: Arc<TaskStore>,
    pub cancel: CancelToken,
    pub config: Config,
    pub dir: tempfile::TempDir,
}

impl EngineFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let client = Arc::new(MockClient::new());
        let store = Arc::new(TaskStore::open_in_memory().expect("store"));
        Self {
            client,
            store,
            cancel: CancelToken::new(),
            config,
            dir,
        }
    }

    pub fn engine(&self, options: CloneOptions) -> ClonerEngine {
        ClonerEngine::new(
            self.client.clone(),
            self.store.clone(),
            self.config.clone(),
            options,
            self.cancel.clone(),
        )
    }
}
