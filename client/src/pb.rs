//! Generated wire types and gRPC client/server stubs for the `runtime.v1`
//! package, produced by `build.rs` via `tonic-build`/`prost-build` from
//! `proto/common.proto` and `proto/runtime.proto`. Nothing in this module is
//! hand-written.

#![allow(clippy::all)]
#![allow(missing_docs)]

include!(concat!(env!("OUT_DIR"), "/runtime.v1.rs"));
