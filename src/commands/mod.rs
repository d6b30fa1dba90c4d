/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint:

- `serve`         - Run the HTTP connect service
- `credential`    - Show stored credentials for a user
- `check_config`  - Validate configuration and print resolved providers
*/

pub mod check_config;
pub mod credential;
pub mod serve;
