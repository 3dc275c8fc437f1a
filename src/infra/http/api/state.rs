use std::sync::Arc;

use crate::cache::ResponseCache;
use crate::catalog::Catalog;
use crate::search::SearchIndex;
use crate::store::ConnectionManager;

#[derive(Clone)]
pub struct ApiState {
    pub catalog: Arc<dyn Catalog>,
    pub cache: ResponseCache,
    pub search: Arc<SearchIndex>,
    pub store: Arc<ConnectionManager>,
}
