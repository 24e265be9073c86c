//! # Development Console Host
//!
//! A small management server that gives the console client a real
//! counterpart: it runs one child process per instance id and exposes the
//! two surfaces the client consumes:
//!
//! - the control plane, `POST /server/{id}/start|stop|restart`, answering
//!   with a `LifecycleResponse` JSON body;
//! - the console transport, `GET /server/{id}`, a WebSocket that streams the
//!   process's output lines to the observer and feeds typed command lines
//!   into its stdin.
//!
//! Every instance runs the same configured shell command (the instance id is
//! passed in `INSTANCE_ID`), which is enough to stand in for a fleet of
//! managed game servers during development and in the integration tests.

pub mod instance;
pub mod routes;
