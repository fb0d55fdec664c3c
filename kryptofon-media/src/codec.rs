//! Thin translators between 16-bit little-endian linear PCM and the
//! A-law / µ-law byte encodings carried in voice PDUs (§4.7).

use kryptofon_proto::Subclass;

const SEG_SHIFT: i16 = 4;
const SEG_MASK: i16 = 0x1f;
const BIAS: i16 = 0x84;
const CLIP: i16 = 32635;

/// A codec tag paired with its PCM translation, mirroring
/// `kryptofon_proto::Subclass` without the wire-only `Unknown` variant.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Codec {
    Lin16,
    Alaw,
    Ulaw,
}

impl Codec {
    pub fn from_subclass(subclass: Subclass) -> Option<Codec> {
        match subclass {
            Subclass::Lin16 => Some(Codec::Lin16),
            Subclass::Alaw => Some(Codec::Alaw),
            Subclass::Ulaw => Some(Codec::Ulaw),
            Subclass::Unknown(_) => None,
        }
    }

    pub fn to_subclass(self) -> Subclass {
        match self {
            Codec::Lin16 => Subclass::Lin16,
            Codec::Alaw => Subclass::Alaw,
            Codec::Ulaw => Subclass::Ulaw,
        }
    }

    /// Encode a buffer of 16-bit little-endian linear PCM samples to
    /// this codec's byte representation, one codec byte per sample
    /// (§4.7: `convertFromPCM`).
    pub fn convert_from_pcm(self, pcm: &[u8]) -> Vec<u8> {
        if self == Codec::Lin16 {
            return lin16_passthrough(pcm);
        }
        pcm.chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .map(|sample| match self {
                Codec::Lin16 => unreachable!(),
                Codec::Alaw => linear_to_alaw(sample),
                Codec::Ulaw => linear_to_ulaw(sample),
            })
            .collect()
    }

    /// Inverse of [`convert_from_pcm`](Self::convert_from_pcm).
    pub fn convert_to_pcm(self, encoded: &[u8]) -> Vec<u8> {
        if self == Codec::Lin16 {
            return lin16_passthrough(encoded);
        }
        encoded
            .iter()
            .flat_map(|&byte| match self {
                Codec::Lin16 => unreachable!(),
                Codec::Alaw => alaw_to_linear(byte).to_le_bytes(),
                Codec::Ulaw => ulaw_to_linear(byte).to_le_bytes(),
            })
            .collect()
    }
}

/// Bypass: PCM in, PCM out, no per-sample translation (§4.7: "A bypass
/// codec exists for LIN16").
pub fn lin16_passthrough(pcm: &[u8]) -> Vec<u8> {
    pcm.to_vec()
}

fn linear_to_alaw(mut pcm: i16) -> u8 {
    let sign = if pcm >= 0 { 0x80u8 } else { 0 };
    if sign == 0 {
        pcm = -pcm;
    }
    if pcm > CLIP {
        pcm = CLIP;
    }

    let alaw = if pcm >= 256 {
        let mut seg = 1u8;
        let mut shifted = pcm >> 8;
        while shifted != 0 && seg < 8 {
            shifted >>= 1;
            seg += 1;
        }
        let seg = seg.min(7);
        let shift = seg + 3;
        let mantissa = ((pcm >> shift) & 0x0f) as u8;
        ((seg << SEG_SHIFT as u8) | mantissa) as u8
    } else {
        (pcm >> 4) as u8
    };
    (alaw ^ sign ^ 0x55) as u8
}

fn alaw_to_linear(alaw: u8) -> i16 {
    let alaw = alaw ^ 0x55;
    let sign = alaw & 0x80;
    let seg = ((alaw & 0x70) >> SEG_SHIFT as u8) as i16;
    let mantissa = (alaw & 0x0f) as i16;

    let mut sample = if seg == 0 {
        (mantissa << 4) + 8
    } else {
        ((mantissa << 4) + 0x108) << (seg - 1)
    };
    if sign == 0 {
        sample = -sample;
    }
    sample
}

fn linear_to_ulaw(pcm: i16) -> u8 {
    let sign = if pcm < 0 { 0x80u8 } else { 0 };
    let mut magnitude = if sign != 0 { -pcm } else { pcm } as i32;
    magnitude += BIAS as i32;
    if magnitude > CLIP as i32 {
        magnitude = CLIP as i32;
    }

    let mut seg = 7u8;
    for s in 0..8 {
        if magnitude <= (0x1f << (s + 3)) {
            seg = s;
            break;
        }
    }
    let mantissa = ((magnitude >> (seg + 3)) & 0x0f) as u8;
    let ulaw = (seg << SEG_SHIFT as u8) | mantissa;
    !(ulaw | sign)
}

fn ulaw_to_linear(ulaw: u8) -> i16 {
    let ulaw = !ulaw;
    let sign = ulaw & 0x80;
    let seg = ((ulaw & 0x70) >> SEG_SHIFT as u8) as i16;
    let mantissa = (ulaw & 0x0f) as i16;

    let mut sample = ((mantissa << 3) + 0x84) << seg;
    sample -= BIAS;
    if sign != 0 {
        sample = -sample;
    }
    sample
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn alaw_round_trip_is_lossy_but_bounded() {
        let samples = [0i16, 100, -100, 5000, -5000, 32000, -32000];
        let pcm = pcm_bytes(&samples);
        let encoded = Codec::Alaw.convert_from_pcm(&pcm);
        assert_eq!(encoded.len(), samples.len());
        let decoded = Codec::Alaw.convert_to_pcm(&encoded);
        let decoded: Vec<i16> = decoded.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect();
        for (orig, back) in samples.iter().zip(decoded.iter()) {
            assert!((*orig as i32 - *back as i32).abs() < 1200, "orig {orig} back {back}");
        }
    }

    #[test]
    fn ulaw_round_trip_is_lossy_but_bounded() {
        let samples = [0i16, 100, -100, 5000, -5000, 32000, -32000];
        let pcm = pcm_bytes(&samples);
        let encoded = Codec::Ulaw.convert_from_pcm(&pcm);
        let decoded = Codec::Ulaw.convert_to_pcm(&encoded);
        let decoded: Vec<i16> = decoded.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect();
        for (orig, back) in samples.iter().zip(decoded.iter()) {
            assert!((*orig as i32 - *back as i32).abs() < 1200, "orig {orig} back {back}");
        }
    }

    #[test]
    fn lin16_is_a_true_passthrough() {
        let pcm = pcm_bytes(&[1, 2, 3, -4]);
        assert_eq!(lin16_passthrough(&pcm), pcm);
    }

    #[test]
    fn subclass_mapping_round_trips() {
        for codec in [Codec::Lin16, Codec::Alaw, Codec::Ulaw] {
            assert_eq!(Codec::from_subclass(codec.to_subclass()), Some(codec));
        }
    }
}
