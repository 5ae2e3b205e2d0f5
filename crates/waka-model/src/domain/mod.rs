mod command;
pub use command::CommandLine;

mod exec_status;
pub use exec_status::ExecStatus;

mod run_state;
pub use run_state::RunState;
