//! Element types accepted by the message-passing substrate.
//!
//! [`Element`] is a sealed trait mapping the handful of Rust primitives the
//! benchmarks move around to a datatype tag understood by the C layer, and
//! to a byte encoding used by the in-process backend.
//!
//! | Rust Type | MPI Equivalent  | Tag Value |
//! |-----------|-----------------|-----------|
//! | `u8`      | `MPI_CHAR`      | 0         |
//! | `i32`     | `MPI_INT32_T`   | 1         |
//! | `f64`     | `MPI_DOUBLE`    | 2         |

/// Seals [`Element`] against implementations outside this crate.
mod sealed {
    pub trait Sealed {}
}

/// Tag values matching the C-side `CONTENTION_*` defines.
///
/// These discriminants must stay in sync with `csrc/contention_mpi.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DatatypeTag {
    /// Raw bytes (`MPI_CHAR`)
    U8 = 0,
    /// 32-bit signed integer (`MPI_INT32_T`)
    I32 = 1,
    /// 64-bit floating point (`MPI_DOUBLE`)
    F64 = 2,
}

/// Trait for types that can be sent, received, or broadcast.
///
/// This is a **sealed trait**: it cannot be implemented outside this crate.
pub trait Element: sealed::Sealed + Copy + Default + Send + 'static {
    /// The datatype tag used for FFI dispatch to the C layer.
    const TAG: DatatypeTag;

    /// Size of one element in bytes.
    const SIZE: usize;

    /// Append the native-endian encoding of `data` to `out`.
    fn encode(data: &[Self], out: &mut Vec<u8>);

    /// Decode native-endian `bytes` into `data`, returning the element count.
    ///
    /// Decodes at most `data.len()` elements.
    fn decode(bytes: &[u8], data: &mut [Self]) -> usize;
}

macro_rules! impl_element {
    ($ty:ty, $tag:expr) => {
        impl sealed::Sealed for $ty {}
        impl Element for $ty {
            const TAG: DatatypeTag = $tag;
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn encode(data: &[Self], out: &mut Vec<u8>) {
                out.reserve(data.len() * Self::SIZE);
                for value in data {
                    out.extend_from_slice(&value.to_ne_bytes());
                }
            }

            fn decode(bytes: &[u8], data: &mut [Self]) -> usize {
                let mut count = 0;
                for (slot, chunk) in data.iter_mut().zip(bytes.chunks_exact(Self::SIZE)) {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(chunk);
                    *slot = <$ty>::from_ne_bytes(raw);
                    count += 1;
                }
                count
            }
        }
    };
}

impl_element!(u8, DatatypeTag::U8);
impl_element!(i32, DatatypeTag::I32);
impl_element!(f64, DatatypeTag::F64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_values_match_c_defines() {
        assert_eq!(DatatypeTag::U8 as i32, 0);
        assert_eq!(DatatypeTag::I32 as i32, 1);
        assert_eq!(DatatypeTag::F64 as i32, 2);
        assert_eq!(u8::TAG, DatatypeTag::U8);
        assert_eq!(i32::TAG, DatatypeTag::I32);
        assert_eq!(f64::TAG, DatatypeTag::F64);
    }

    #[test]
    fn f64_bytes_survive_the_trip() {
        let mut bytes = Vec::new();
        f64::encode(&[1.5, -0.25, 3.0e-7], &mut bytes);
        assert_eq!(bytes.len(), 24);
        let mut out = [0.0f64; 3];
        assert_eq!(f64::decode(&bytes, &mut out), 3);
        assert_eq!(out, [1.5, -0.25, 3.0e-7]);
    }

    #[test]
    fn decode_stops_at_shorter_side() {
        let mut bytes = Vec::new();
        i32::encode(&[7, -1, 9], &mut bytes);
        let mut short = [0i32; 2];
        assert_eq!(i32::decode(&bytes, &mut short), 2);
        assert_eq!(short, [7, -1]);

        let mut long = [0i32; 5];
        assert_eq!(i32::decode(&bytes, &mut long), 3);
        assert_eq!(long, [7, -1, 9, 0, 0]);
    }
}
