//! tlspol Core - policy resolution engine
//!
//! Given a recipient domain, decides whether outgoing SMTP must be protected
//! by DANE (DNSSEC-validated TLSA records on the domain's MX hosts) or
//! MTA-STS (DNS-advertised, HTTPS-published policy), and serves that
//! decision to the MTA over the netstring-framed socketmap protocol.

pub mod cache;
pub mod dns;
pub mod domain;
pub mod netstring;
pub mod policy;
pub mod prefetch;
pub mod socketmap;

#[cfg(test)]
pub(crate) mod testutil;

pub use policy::resolver::PolicyResolver;
pub use socketmap::server::PolicyServer;
