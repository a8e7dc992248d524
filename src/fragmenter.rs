use bytes::{BufMut, Bytes, BytesMut};
use crate::error::LtpError;
use crate::frame::DataFrame;
use crate::types::{Nonce, SeqNo, SessionKey};

/// Splits a payload into DATA frames numbered from 1. The fragments share the payload's
///  buffer, no bytes are copied.
pub fn fragment(payload: &Bytes, max_fragment_payload: usize, nonce: Nonce, sk: SessionKey) -> Result<Vec<DataFrame>, LtpError> {
    if max_fragment_payload == 0 {
        return Err(LtpError::NoFragmentCapacity);
    }
    if max_fragment_payload > u16::MAX as usize {
        return Err(LtpError::FragmentTooLarge { len: max_fragment_payload });
    }

    let num_fragments = payload.len().div_ceil(max_fragment_payload);
    if num_fragments > SeqNo::MAX as usize {
        return Err(LtpError::PayloadTooLarge { len: payload.len(), fragments: num_fragments });
    }

    let frames = (0..num_fragments)
        .map(|i| {
            let start = i * max_fragment_payload;
            let end = (start + max_fragment_payload).min(payload.len());
            DataFrame {
                nonce,
                sk,
                seq: (i + 1) as SeqNo,
                payload: payload.slice(start..end),
            }
        })
        .collect();
    Ok(frames)
}

pub fn reassemble<'a>(fragments: impl IntoIterator<Item = &'a Bytes>) -> Bytes {
    let fragments = fragments.into_iter().collect::<Vec<_>>();
    let len = fragments.iter().map(|f| f.len()).sum();

    let mut buf = BytesMut::with_capacity(len);
    for f in fragments {
        buf.put_slice(f);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::empty(0, 8, vec![])]
    #[case::single_short(3, 8, vec![3])]
    #[case::single_exact(8, 8, vec![8])]
    #[case::two(9, 8, vec![8, 1])]
    #[case::scenario(10_000, 1200, vec![1200, 1200, 1200, 1200, 1200, 1200, 1200, 1200, 400])]
    fn test_fragment(#[case] len: usize, #[case] max: usize, #[case] expected_lens: Vec<usize>) {
        let payload = Bytes::from((0..len).map(|i| i as u8).collect::<Vec<_>>());
        let frames = fragment(&payload, max, 5, 6).unwrap();

        assert_eq!(frames.iter().map(|f| f.payload.len()).collect::<Vec<_>>(), expected_lens);
        assert_eq!(frames.iter().map(|f| f.seq as usize).collect::<Vec<_>>(), (1..=expected_lens.len()).collect::<Vec<_>>());
        assert!(frames.iter().all(|f| f.nonce == 5 && f.sk == 6));

        let reassembled = reassemble(frames.iter().map(|f| &f.payload));
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn test_fragment_multiple_of_8_needs_no_padding() {
        let payload = Bytes::from(vec![1u8; 10_000]);
        let frames = fragment(&payload, 1200, 23, 1).unwrap();
        for f in &frames {
            assert_eq!(f.serialized_len() - DataFrame::HEADER_LEN, f.payload.len());
        }
    }

    #[test]
    fn test_fragment_odd_tail_is_padded_on_the_wire() {
        let payload = Bytes::from(vec![1u8; 13]);
        let frames = fragment(&payload, 8, 23, 1).unwrap();
        assert_eq!(frames[1].payload.len(), 5);
        assert_eq!(frames[1].serialized_len(), DataFrame::HEADER_LEN + 8);
    }

    #[test]
    fn test_fragment_no_capacity() {
        assert_eq!(fragment(&Bytes::from_static(b"abc"), 0, 23, 1), Err(LtpError::NoFragmentCapacity));
    }

    #[test]
    fn test_fragment_too_many() {
        let payload = Bytes::from(vec![0u8; 8 * (SeqNo::MAX as usize + 1)]);
        assert_eq!(
            fragment(&payload, 8, 23, 1),
            Err(LtpError::PayloadTooLarge { len: 8 * (SeqNo::MAX as usize + 1), fragments: SeqNo::MAX as usize + 1 })
        );
    }
}
