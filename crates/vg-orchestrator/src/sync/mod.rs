//! Template distribution across cluster nodes

mod orchestrator;
mod task;
mod template;

pub use orchestrator::{
    FanOutResult, SyncOrchestrator, SyncTaskQuery, TemplateImport, TemplateUpload,
    DEFAULT_PAGE_SIZE, IMPORT_VMID_BASE, MAX_PAGE_SIZE,
};
pub use task::{SyncPlan, SyncTask, SyncTaskView};
pub use template::{content_for_file, RestoreSource, Template, TemplateStore};
