//! DomainFlow, a multi-tenant campaign orchestrator
//!
//! Facade over the campaign execution core. The engine crate owns the state
//! machine, worker coordination, generation cursor, reconciliation, and SSE
//! fabric; this crate wires the singletons into a server process.

pub use domainflow_engine::*;
