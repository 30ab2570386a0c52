//! Minimal RIFF/WAVE container encoding
//!
//! Captured utterances are shipped to the transcription API as WAV files.
//! The remote side validates the container, so the header layout here is
//! bit-exact: 44 bytes, single `fmt ` chunk (uncompressed PCM), single
//! `data` chunk, all sizes little-endian.

/// Canonical WAV header length in bytes
pub const WAV_HEADER_LEN: usize = 44;

/// Wrap raw little-endian PCM bytes in a WAV container.
pub fn encode_wav(pcm_data: &[u8], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let byte_rate = sample_rate * (channels as u32) * (bits_per_sample as u32) / 8;
    let block_align = channels * bits_per_sample / 8;
    let data_size = pcm_data.len() as u32;
    let file_size = 36 + data_size;

    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + pcm_data.len());

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt subchunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // Subchunk1Size (16 for PCM)
    wav.extend_from_slice(&1u16.to_le_bytes()); // AudioFormat (1 = PCM)
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data subchunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_size.to_le_bytes());
    wav.extend_from_slice(pcm_data);

    wav
}

/// Encode 16-bit signed samples as a WAV file.
pub fn encode_wav_i16(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let pcm_bytes: Vec<u8> = samples.iter().flat_map(|&s| s.to_le_bytes()).collect();
    encode_wav(&pcm_bytes, sample_rate, channels, 16)
}
