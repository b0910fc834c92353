// Copyright (c) 2020, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

pub mod protobuf {
    use crate::error::*;
    use prost::{encoding::encoded_len_varint, Message};

    pub fn serialize(payload: &impl Message) -> Result<Vec<u8>> {
        let size = size_hint(payload).unwrap_or(0);
        let mut buf = Vec::with_capacity(size);
        payload.encode_length_delimited(&mut buf)?;
        Ok(buf)
    }

    pub fn deserialize<T: Message + Default>(bytes: &[u8]) -> Result<T> {
        Ok(T::decode_length_delimited(bytes)?)
    }

    pub fn size_hint(payload: &impl Message) -> Option<usize> {
        let len = payload.encoded_len();
        Some(len + encoded_len_varint(len as u64))
    }
}

/// Fixed size key encoding
///
/// Integers are written big-endian so that the byte order of an encoded key
/// matches the numeric order of its components. Range scans over the sled
/// trees depend on this.
pub mod fixed_bytes {
    use crate::error::*;
    use bytes::{Buf, BufMut};
    use snafu::ensure;

    pub trait FixedBytes: Sized {
        const SIZE: usize;

        fn serialize_into(target: impl BufMut, payload: &Self) -> Result<()>;
        fn deserialize_from(source: impl Buf) -> Result<Self>;

        fn serialize(payload: &Self) -> Result<Vec<u8>> {
            let mut res = Vec::with_capacity(Self::SIZE);
            Self::serialize_into(&mut res, payload)?;
            Ok(res)
        }

        fn deserialize(bytes: &[u8]) -> Result<Self> {
            Self::deserialize_from(bytes)
        }
    }

    pub fn serialize<T: FixedBytes>(payload: &T) -> Result<Vec<u8>> {
        T::serialize(payload)
    }
    pub fn deserialize<T: FixedBytes>(bytes: &[u8]) -> Result<T> {
        T::deserialize(bytes)
    }

    macro_rules! impl_fixed_bytes {
        ($($t: ty),+) => {$(
            impl FixedBytes for $t {
                const SIZE: usize = std::mem::size_of::<Self>();

                fn serialize_into(
                    mut target: impl BufMut,
                    payload: &Self,
                ) -> Result<()> {
                    let bytes = payload.to_be_bytes();
                    let needed = bytes.len();
                    let dest_len = target.remaining_mut();
                    ensure!(dest_len >= needed, FixedBytesSerializationError { needed, dest_len });
                    target.put_slice(&bytes);
                    Ok(())
                }

                fn deserialize_from(mut source: impl Buf) -> Result<Self> {
                    let mut buf = [0; std::mem::size_of::<Self>()];
                    let needed = buf.len();
                    let source_len = source.remaining();
                    ensure!(source_len >= needed,
                        FixedBytesDeserializationError { needed, source_len });
                    source.copy_to_slice(&mut buf);
                    Ok(Self::from_be_bytes(buf))
                }
            }
        )+};
    }
    impl_fixed_bytes!(u32, u64);

    macro_rules! impl_fixed_bytes_for_tuples {
        ($(($($T: ident),*)),*) => {$(
            #[allow(non_snake_case)]
            impl<$($T: FixedBytes),*> FixedBytes for ($($T),*) {
                const SIZE: usize = 0 $(+ $T::SIZE)*;

                fn serialize_into(
                    mut target: impl BufMut,
                    payload: &Self,
                ) -> Result<()> {
                    let ($($T),*) = payload;
                    $(
                        $T::serialize_into(&mut target, $T)?;
                    )*
                    Ok(())
                }

                fn deserialize_from(mut source: impl Buf) -> Result<Self> {
                    Ok(($(
                        $T::deserialize_from(&mut source)?
                    ),*))
                }
            }
        )*};
    }
    impl_fixed_bytes_for_tuples!((A, B), (A, B, C));

}
