//! PCM and WAV conversion helpers.

use crate::error::VoicelineError;
use crate::types::AudioChunk;

fn audio_err(message: impl Into<String>) -> VoicelineError {
    VoicelineError::Audio {
        message: message.into(),
    }
}

/// Convert f32 samples (-1.0..1.0) to i16 samples.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let clamped = s.clamp(-1.0, 1.0);
            (clamped * i16::MAX as f32) as i16
        })
        .collect()
}

/// Convert i16 samples to f32 samples (-1.0..1.0).
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&s| s as f32 / i16::MAX as f32)
        .collect()
}

/// Encode mono f32 samples to 16-bit PCM WAV bytes.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, VoicelineError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| audio_err(format!("WAV write error: {e}")))?;
        for sample in f32_to_i16(samples) {
            writer
                .write_sample(sample)
                .map_err(|e| audio_err(format!("WAV sample write error: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| audio_err(format!("WAV finalize error: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Decode WAV bytes to an [`AudioChunk`].
pub fn decode_wav(data: &[u8]) -> Result<AudioChunk, VoicelineError> {
    let cursor = std::io::Cursor::new(data);
    let mut reader =
        hound::WavReader::new(cursor).map_err(|e| audio_err(format!("WAV read error: {e}")))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|e| audio_err(format!("WAV sample read error: {e}")))?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|e| audio_err(format!("WAV float sample read error: {e}")))?,
    };

    Ok(AudioChunk {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_i16_round_trip() {
        let samples = vec![0.0, 0.5, -0.5, 1.0, -1.0];
        let back = i16_to_f32(&f32_to_i16(&samples));
        for (a, b) in samples.iter().zip(back.iter()) {
            assert!((a - b).abs() < 0.001, "{a} vs {b}");
        }
    }

    #[test]
    fn test_wav_round_trip() {
        let samples: Vec<f32> = (0..1600)
            .map(|i| (i as f32 * 0.01).sin() * 0.8)
            .collect();
        let bytes = encode_wav(&samples, 16000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");

        let decoded = decode_wav(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.samples.len(), samples.len());
        for (a, b) in samples.iter().zip(decoded.samples.iter()) {
            assert!((a - b).abs() < 0.001);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_wav(b"not a wav file").is_err());
    }
}
