//! Annex B NAL unit scanning shared by the H.264 and H.265 paths.
//!
//! Bitstreams delimit NAL units with start codes:
//! - 4-byte: `0x00 0x00 0x00 0x01`
//! - 3-byte: `0x00 0x00 0x01`
//!
//! Encoder packets usually hold exactly one NAL unit with its start code, but
//! an encoder may also hand over several NAL units in one packet, or a bare
//! NAL unit whose start code was already stripped. [`split_payload`] accepts
//! all three layouts.

use std::ops::Range;

use crate::config::Codec;

/// Location of one NAL unit inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalRange {
    /// Index of the first start-code byte.
    pub start_code: usize,
    /// Index of the first NAL header byte.
    pub start: usize,
    /// One past the last NAL byte.
    pub end: usize,
}

/// Find every start-code-delimited NAL unit in `data`.
///
/// The start code length is tracked per NAL so boundaries are computed
/// correctly when 3-byte and 4-byte start codes are mixed. Bytes before the
/// first start code are ignored, as are empty NAL units.
pub fn find_nal_units(data: &[u8]) -> Vec<NalRange> {
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut start_entries: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            start_entries.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            start_entries.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut ranges = Vec::with_capacity(start_entries.len());
    for (idx, &(start, sc_len)) in start_entries.iter().enumerate() {
        let end = match start_entries.get(idx + 1) {
            Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
            None => data.len(),
        };

        if start < end {
            ranges.push(NalRange {
                start_code: start - sc_len,
                start,
                end,
            });
        }
    }

    ranges
}

/// Extract NAL unit bodies (without start codes) from an Annex B buffer.
pub fn extract_nal_units(data: &[u8]) -> Vec<&[u8]> {
    find_nal_units(data)
        .into_iter()
        .map(|r| &data[r.start..r.end])
        .collect()
}

/// Whether `data` begins with a 3- or 4-byte start code.
pub fn starts_with_start_code(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1])
}

/// Split one encoder packet payload into NAL units.
///
/// Payloads that begin with a start code are scanned for further start codes;
/// anything else is taken as a single bare NAL unit.
pub fn split_payload(payload: &[u8]) -> Vec<&[u8]> {
    if payload.is_empty() {
        Vec::new()
    } else if starts_with_start_code(payload) {
        extract_nal_units(payload)
    } else {
        vec![payload]
    }
}

/// Coarse NAL unit role, enough to find access unit boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalKind {
    /// Coded slice; `first_in_picture` is set on the first slice of a picture.
    Slice { first_in_picture: bool },
    /// VPS / SPS / PPS.
    ParameterSet,
    /// Access unit delimiter.
    Delimiter,
    /// Supplemental enhancement information.
    Sei,
    Other,
}

/// Classify a NAL unit body (no start code).
pub fn classify(codec: Codec, nal: &[u8]) -> NalKind {
    let Some(&first) = nal.first() else {
        return NalKind::Other;
    };

    match codec {
        Codec::H264 => match first & 0x1f {
            // first_mb_in_slice is ue(v); a leading 1 bit encodes 0
            1..=5 => NalKind::Slice {
                first_in_picture: nal.get(1).is_some_and(|b| b & 0x80 != 0),
            },
            6 => NalKind::Sei,
            7 | 8 => NalKind::ParameterSet,
            9 => NalKind::Delimiter,
            _ => NalKind::Other,
        },
        Codec::H265 => match (first >> 1) & 0x3f {
            // first_slice_segment_in_pic_flag follows the 2-byte header
            0..=31 => NalKind::Slice {
                first_in_picture: nal.get(2).is_some_and(|b| b & 0x80 != 0),
            },
            32..=34 => NalKind::ParameterSet,
            35 => NalKind::Delimiter,
            // prefix SEI only; suffix SEI trails the picture it belongs to
            39 => NalKind::Sei,
            _ => NalKind::Other,
        },
    }
}

/// How a run of NAL units maps onto RTP payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadUnit {
    /// One NAL unit in one packet.
    Single(usize),
    /// Several consecutive NAL units in one aggregation packet.
    Aggregate(Range<usize>),
    /// One NAL unit split over two or more fragmentation packets.
    Fragmented(usize),
}

/// Decide the payload layout for one access unit.
///
/// `budget` is the largest RTP payload. `aggregation_header` is the size of
/// the codec's aggregation payload header (1 for STAP-A, 2 for AP); each
/// aggregated NAL unit costs two more bytes for its length prefix. Aggregation
/// packets are only formed when at least two NAL units fit.
pub fn plan_payloads(
    nals: &[&[u8]],
    budget: usize,
    aggregation_header: usize,
    aggregation: bool,
) -> Vec<PayloadUnit> {
    let mut units = Vec::new();
    let mut i = 0usize;

    while i < nals.len() {
        if nals[i].len() > budget {
            units.push(PayloadUnit::Fragmented(i));
            i += 1;
            continue;
        }

        let mut end = i + 1;
        if aggregation {
            let mut size = aggregation_header + 2 + nals[i].len();
            while let Some(next) = nals.get(end) {
                let grown = size + 2 + next.len();
                if next.len() > budget || grown > budget || next.len() > u16::MAX as usize {
                    break;
                }
                size = grown;
                end += 1;
            }
        }

        if end - i >= 2 {
            units.push(PayloadUnit::Aggregate(i..end));
        } else {
            units.push(PayloadUnit::Single(i));
        }
        i = end;
    }

    units
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- NAL extraction ---

    #[test]
    fn extract_single_nal_4byte_sc() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0xBB];
        let nals = extract_nal_units(&data);
        assert_eq!(nals, vec![&[0x65, 0xAA, 0xBB][..]]);
    }

    #[test]
    fn extract_single_nal_3byte_sc() {
        let data = [0, 0, 1, 0x67, 0x42, 0x00];
        let nals = extract_nal_units(&data);
        assert_eq!(nals, vec![&[0x67, 0x42, 0x00][..]]);
    }

    #[test]
    fn extract_mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        let ranges = find_nal_units(&data);
        assert_eq!(ranges.len(), 2);
        assert_eq!(
            ranges[1],
            NalRange {
                start_code: 6,
                start: 9,
                end: 11
            }
        );
        let nals = extract_nal_units(&data);
        assert_eq!(nals[0], [0x67, 0x42]);
        assert_eq!(nals[1], [0x68, 0xCE]);
    }

    #[test]
    fn extract_empty_data() {
        assert!(extract_nal_units(&[]).is_empty());
    }

    #[test]
    fn extract_no_start_code() {
        assert!(extract_nal_units(&[0xFF, 0xFE]).is_empty());
    }

    #[test]
    fn split_bare_payload_is_one_nal() {
        assert_eq!(split_payload(&[0x41, 0x9A, 0x00]), vec![&[0x41, 0x9A, 0x00][..]]);
        assert!(split_payload(&[]).is_empty());
    }

    #[test]
    fn split_payload_with_several_nals() {
        let data = [0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE];
        assert_eq!(split_payload(&data).len(), 2);
    }

    // --- Classification ---

    #[test]
    fn classify_h264() {
        assert_eq!(classify(Codec::H264, &[0x67, 0x42]), NalKind::ParameterSet);
        assert_eq!(classify(Codec::H264, &[0x09, 0xF0]), NalKind::Delimiter);
        assert_eq!(
            classify(Codec::H264, &[0x65, 0x88]),
            NalKind::Slice {
                first_in_picture: true
            }
        );
        assert_eq!(
            classify(Codec::H264, &[0x41, 0x12]),
            NalKind::Slice {
                first_in_picture: false
            }
        );
    }

    #[test]
    fn classify_h265() {
        // VPS, SPS, PPS
        for t in [32u8, 33, 34] {
            assert_eq!(classify(Codec::H265, &[t << 1, 0x01]), NalKind::ParameterSet);
        }
        // IDR_W_RADL (19) with first_slice_segment_in_pic_flag
        assert_eq!(
            classify(Codec::H265, &[19 << 1, 0x01, 0xAF]),
            NalKind::Slice {
                first_in_picture: true
            }
        );
        assert_eq!(classify(Codec::H265, &[39 << 1, 0x01]), NalKind::Sei);
    }

    // --- Planning ---

    #[test]
    fn plan_aggregates_small_units() {
        let a = [0u8; 10];
        let b = [0u8; 20];
        let c = [0u8; 30];
        let plan = plan_payloads(&[&a, &b, &c], 1400, 1, true);
        assert_eq!(plan, vec![PayloadUnit::Aggregate(0..3)]);
    }

    #[test]
    fn plan_without_aggregation_is_single() {
        let a = [0u8; 10];
        let b = [0u8; 20];
        let plan = plan_payloads(&[&a, &b], 1400, 1, false);
        assert_eq!(plan, vec![PayloadUnit::Single(0), PayloadUnit::Single(1)]);
    }

    #[test]
    fn plan_respects_budget() {
        // 1 + (2 + 40) + (2 + 40) = 85 > 80
        let a = [0u8; 40];
        let b = [0u8; 40];
        let big = [0u8; 200];
        let plan = plan_payloads(&[&a, &b, &big], 80, 1, true);
        assert_eq!(
            plan,
            vec![
                PayloadUnit::Single(0),
                PayloadUnit::Single(1),
                PayloadUnit::Fragmented(2)
            ]
        );
    }

    #[test]
    fn plan_exact_fit_aggregates() {
        // 1 + (2 + 38) + (2 + 37) = 80
        let a = [0u8; 38];
        let b = [0u8; 37];
        let plan = plan_payloads(&[&a, &b], 80, 1, true);
        assert_eq!(plan, vec![PayloadUnit::Aggregate(0..2)]);
    }
}
