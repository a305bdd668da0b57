pub mod builder;
pub mod interface;
pub mod query;

mod cmd_dependencies;
mod cmd_find_symbols;
mod cmd_list_symbols;
mod cmd_status;

pub use builder::build_job;
pub use cmd_dependencies::DependenciesCommand;
pub use cmd_find_symbols::{FindSymbolsCommand, LocationAndDefinition};
pub use cmd_list_symbols::ListSymbolsCommand;
pub use cmd_status::{StatusCommand, ALTERNATIVES, DELIMITER};
pub use interface::{Job, JobCommand, JobContext, JobFlags, JobStatus, LineSink};
pub use query::{QueryFlags, QueryKind, QueryMessage};
