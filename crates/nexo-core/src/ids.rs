/// Identifies a TCP connection for the lifetime of its session. Brokers
/// never hold a reference back to the connection itself -- only this
/// opaque id, per the "no cyclic object graphs" design note. The
/// connection multiplexer assigns these monotonically at accept time.
pub type ConnId = u64;
