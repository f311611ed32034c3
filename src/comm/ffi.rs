//! Raw FFI bindings to the C layer in `csrc/contention_mpi.c`.
//!
//! These are low-level unsafe functions. Use the safe wrappers in
//! [`super::mpi`].

use std::os::raw::{c_double, c_int, c_void};

extern "C" {
    // ============================================================
    // Initialization and Finalization
    // ============================================================

    pub fn contention_init() -> c_int;
    pub fn contention_finalize() -> c_int;
    pub fn contention_initialized(flag: *mut c_int) -> c_int;

    // ============================================================
    // Communicators
    // ============================================================

    pub fn contention_comm_world() -> i32;
    pub fn contention_comm_rank(comm: i32, rank: *mut i32) -> c_int;
    pub fn contention_comm_size(comm: i32, size: *mut i32) -> c_int;
    pub fn contention_comm_free(comm: i32) -> c_int;
    pub fn contention_comm_create(
        comm: i32,
        ranks: *const i32,
        n: i64,
        newcomm: *mut i32,
    ) -> c_int;

    // ============================================================
    // Point-to-Point
    // ============================================================

    pub fn contention_barrier(comm: i32) -> c_int;

    pub fn contention_send(
        buf: *const c_void,
        count: i64,
        datatype_tag: i32,
        dest: i32,
        tag: i32,
        comm: i32,
    ) -> c_int;

    pub fn contention_recv(
        buf: *mut c_void,
        count: i64,
        datatype_tag: i32,
        source: i32,
        tag: i32,
        comm: i32,
        actual_source: *mut i32,
        actual_tag: *mut i32,
        actual_count: *mut i64,
    ) -> c_int;

    pub fn contention_irecv(
        buf: *mut c_void,
        count: i64,
        datatype_tag: i32,
        source: i32,
        tag: i32,
        comm: i32,
        request: *mut i64,
    ) -> c_int;

    pub fn contention_wait(request: i64) -> c_int;

    // ============================================================
    // Collectives
    // ============================================================

    pub fn contention_bcast(
        buf: *mut c_void,
        count: i64,
        datatype_tag: i32,
        root: i32,
        comm: i32,
    ) -> c_int;

    pub fn contention_allreduce_f64(
        value: c_double,
        result: *mut c_double,
        op: i32,
        comm: i32,
    ) -> c_int;

    // ============================================================
    // Utility
    // ============================================================

    pub fn contention_wtime() -> c_double;
    pub fn contention_abort(comm: i32, errorcode: i32) -> c_int;
}

/// Value written to `newcomm` for callers outside the new group.
pub const COMM_NULL: i32 = -1;
