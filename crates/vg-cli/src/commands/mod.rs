//! CLI command implementations

mod config;
mod console;
mod sync;
mod tasks;
mod upload;

pub use config::{config_init, config_path, config_show, load_effective_config};
pub use console::console_command;
pub use sync::{sync_list_command, sync_retry_command, sync_show_command, sync_template_command};
pub use tasks::{task_list_command, task_log_command, task_status_command, task_stop_command};
pub use upload::{upload_template_command, upload_volume_command, uploads_command};
