// ── Paw Engine Layer ───────────────────────────────────────────────────────
// Everything that does I/O: tier databases, embedding providers, and the
// engram memory engine built on them.

pub mod engram;
pub mod memory;
pub mod store;
