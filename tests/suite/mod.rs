#[cfg(unix)]
mod cli_flows;
#[cfg(unix)]
mod config_file;
