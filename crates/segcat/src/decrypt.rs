use std::mem;

use aes::cipher::{BlockDecryptMut, KeyIvInit};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    error::{CatError, CatResult},
    util::pipe::{pipe, ByteStream, PipeWriter},
};

pub const BLOCK_SIZE: usize = 16;
/// Default size of the chunks ciphertext is read and decrypted in.
pub const DEFAULT_CBC_BUFFER_SIZE: usize = 4096 + BLOCK_SIZE;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Returns `size` if it is a usable chunk size, otherwise the default one.
pub fn normalize_chunk_size(size: usize) -> usize {
    if size == 0 || size % BLOCK_SIZE != 0 {
        DEFAULT_CBC_BUFFER_SIZE
    } else {
        size
    }
}

/// Parses an `EXT-X-KEY` IV attribute.
///
/// The `0x` prefix is optional. Without an explicit IV the media sequence
/// number is used, big endian.
pub fn parse_iv(iv: Option<&str>, media_sequence: u64) -> CatResult<[u8; 16]> {
    let Some(iv) = iv else {
        return Ok((media_sequence as u128).to_be_bytes());
    };

    let digits = iv
        .strip_prefix("0x")
        .or_else(|| iv.strip_prefix("0X"))
        .unwrap_or(iv);
    u128::from_str_radix(digits, 16)
        .map(u128::to_be_bytes)
        .map_err(|_| CatError::InvalidHexIv(iv.to_string()))
}

/// Strips PKCS7 padding from the final plaintext block.
///
/// The last byte is the padding length. A length of zero means the whole
/// block is padding. Every padding byte must repeat the declared value,
/// which doubles as a corruption check since nothing else authenticates the
/// ciphertext.
pub fn unpad(block: &[u8]) -> CatResult<&[u8]> {
    if block.len() < BLOCK_SIZE {
        return Err(CatError::BlockTooSmall(block.len()));
    }

    let declared = block[block.len() - 1];
    if declared as usize > BLOCK_SIZE {
        return Err(CatError::InvalidPadLength(declared));
    }
    let pad_len = if declared == 0 {
        BLOCK_SIZE
    } else {
        declared as usize
    };

    let pad_start = block.len() - pad_len;
    if let Some(&found) = block[pad_start..].iter().find(|&&v| v != declared) {
        return Err(CatError::InvalidPadValue {
            found,
            expected: declared,
        });
    }
    Ok(&block[..pad_start])
}

/// Reads at least one block and then tops the read up to a block boundary.
///
/// `buf` must be a multiple of [`BLOCK_SIZE`] long. A return value that is
/// not a multiple of the block size means the stream ended inside a block.
/// Zero means the stream has ended.
pub async fn read_aligned<R>(reader: &mut R, buf: &mut [u8]) -> CatResult<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    debug_assert!(buf.len() % BLOCK_SIZE == 0 && !buf.is_empty());

    let mut filled = 0;
    while filled < BLOCK_SIZE {
        let read = reader
            .read(&mut buf[filled..])
            .await
            .map_err(CatError::from_io)?;
        if read == 0 {
            return Ok(filled);
        }
        filled += read;
    }

    while filled % BLOCK_SIZE != 0 {
        let boundary = filled.next_multiple_of(BLOCK_SIZE);
        let read = reader
            .read(&mut buf[filled..boundary])
            .await
            .map_err(CatError::from_io)?;
        if read == 0 {
            break;
        }
        filled += read;
    }

    Ok(filled)
}

enum Stage {
    /// Nothing has been decrypted yet.
    Accumulating,
    /// `held` holds the latest decrypted chunk, which is the final one if the
    /// stream ends now.
    HoldingFinalCandidate,
}

/// AES-128-CBC decryptor for a ciphertext of unknown length.
///
/// Only the final block carries padding, and the end of the stream is only
/// known after a read comes back empty. Every decrypted chunk is therefore
/// held back until the next one arrives.
pub struct CbcStreamDecryptor {
    cipher: Aes128CbcDec,
    stage: Stage,
    held: Vec<u8>,
}

impl CbcStreamDecryptor {
    pub fn new(key: &[u8; 16], iv: &[u8; 16]) -> Self {
        Self {
            cipher: Aes128CbcDec::new(key.into(), iv.into()),
            stage: Stage::Accumulating,
            held: Vec::new(),
        }
    }

    /// Decrypts the next ciphertext chunk.
    ///
    /// Returns the plaintext of the previous chunk, which is now known not to
    /// be final.
    pub fn push(&mut self, mut chunk: Vec<u8>) -> CatResult<Option<Vec<u8>>> {
        if chunk.len() < BLOCK_SIZE {
            return Err(CatError::BlockTooSmall(chunk.len()));
        }
        if chunk.len() % BLOCK_SIZE != 0 {
            return Err(CatError::UnalignedCiphertext(chunk.len() % BLOCK_SIZE));
        }

        for block in chunk.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher.decrypt_block_mut(block.into());
        }

        match self.stage {
            Stage::Accumulating => {
                self.held = chunk;
                self.stage = Stage::HoldingFinalCandidate;
                Ok(None)
            }
            Stage::HoldingFinalCandidate => Ok(Some(mem::replace(&mut self.held, chunk))),
        }
    }

    /// Ends the stream, returning the unpadded final chunk.
    pub fn finish(self) -> CatResult<Vec<u8>> {
        match self.stage {
            Stage::Accumulating => Ok(Vec::new()),
            Stage::HoldingFinalCandidate => {
                let mut held = self.held;
                let len = unpad(&held)?.len();
                held.truncate(len);
                Ok(held)
            }
        }
    }
}

/// Decrypts everything `reader` yields into `writer`.
pub async fn decrypt_to<R>(
    reader: &mut R,
    writer: &mut PipeWriter,
    key: &[u8; 16],
    iv: &[u8; 16],
    chunk_size: usize,
) -> CatResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let chunk_size = normalize_chunk_size(chunk_size);
    let mut decryptor = CbcStreamDecryptor::new(key, iv);

    loop {
        let mut chunk = vec![0; chunk_size];
        let read = read_aligned(reader, &mut chunk).await?;
        if read == 0 {
            break;
        }
        chunk.truncate(read);

        if let Some(plaintext) = decryptor.push(chunk)? {
            writer.write(Bytes::from(plaintext)).await?;
        }
    }

    let plaintext = decryptor.finish()?;
    writer.write(Bytes::from(plaintext)).await
}

/// Spawns a task decrypting `reader`, returning the plaintext stream.
///
/// A decryption or read failure closes the returned stream with that error.
pub fn decrypt_stream(
    mut reader: ByteStream,
    key: [u8; 16],
    iv: [u8; 16],
    chunk_size: usize,
) -> ByteStream {
    let (mut writer, output) = pipe(2);
    tokio::spawn(async move {
        if let Err(e) = decrypt_to(&mut reader, &mut writer, &key, &iv, chunk_size).await {
            tracing::debug!("decryption failed: {e}");
            writer.close_with_error(e).await;
        }
    });
    output
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{error::ErrorKind, test_util::encrypt, util::pipe::unbounded_pipe};

    const KEY: [u8; 16] = u128::to_be_bytes(0xa8cda0ee5390b716298ffad0a1f1a021);
    const IV: [u8; 16] = u128::to_be_bytes(0xE60C79C314E3C9B471E7E51ABAA0B24A);

    async fn decrypt_all(ciphertext: Vec<u8>, chunk_size: usize) -> CatResult<Vec<u8>> {
        let mut stream = decrypt_stream(Box::pin(Cursor::new(ciphertext)), KEY, IV, chunk_size);
        let mut plaintext = Vec::new();
        stream
            .read_to_end(&mut plaintext)
            .await
            .map_err(CatError::from_io)?;
        Ok(plaintext)
    }

    fn plaintext(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_unpad() {
        let mut block = [0xAAu8; 16];
        block[13..].copy_from_slice(&[3, 3, 3]);
        assert_eq!(unpad(&block).unwrap(), &[0xAA; 13]);

        // whole-block padding
        assert_eq!(unpad(&[16u8; 16]).unwrap(), &[] as &[u8]);
    }

    #[test]
    fn test_unpad_zero_means_whole_block() {
        assert_eq!(unpad(&[0u8; 16]).unwrap(), &[] as &[u8]);

        let mut data = vec![0x11u8; 16];
        data.extend_from_slice(&[0u8; 16]);
        assert_eq!(unpad(&data).unwrap(), &[0x11u8; 16]);
    }

    #[test]
    fn test_unpad_errors() {
        let mut block = [1u8; 16];
        block[15] = 17;
        assert!(matches!(unpad(&block), Err(CatError::InvalidPadLength(17))));

        let mut block = [4u8; 16];
        block[13] = 9;
        assert!(matches!(
            unpad(&block),
            Err(CatError::InvalidPadValue {
                found: 9,
                expected: 4
            })
        ));

        assert!(matches!(unpad(&[1u8; 15]), Err(CatError::BlockTooSmall(15))));
    }

    #[test]
    fn test_parse_iv() {
        assert_eq!(
            parse_iv(Some("0x00000000000000000000000000000001"), 0).unwrap(),
            1u128.to_be_bytes()
        );
        assert_eq!(
            parse_iv(Some("E60C79C314E3C9B471E7E51ABAA0B24A"), 0).unwrap(),
            IV
        );
        assert_eq!(parse_iv(None, 42).unwrap(), 42u128.to_be_bytes());
        assert!(matches!(
            parse_iv(Some("0xzz"), 0),
            Err(CatError::InvalidHexIv(_))
        ));
    }

    #[test]
    fn test_normalize_chunk_size() {
        assert_eq!(normalize_chunk_size(32), 32);
        assert_eq!(normalize_chunk_size(33), DEFAULT_CBC_BUFFER_SIZE);
        assert_eq!(normalize_chunk_size(0), DEFAULT_CBC_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_round_trip() {
        for len in [16, 32, 48, 4096, 4112, 10000 * 16] {
            for chunk_size in [16, 32, DEFAULT_CBC_BUFFER_SIZE] {
                let data = plaintext(len);
                let decrypted = decrypt_all(encrypt(&data, &KEY, &IV), chunk_size)
                    .await
                    .unwrap();
                assert_eq!(decrypted, data, "len={len} chunk_size={chunk_size}");
            }
        }
    }

    #[tokio::test]
    async fn test_round_trip_unaligned_plaintext() {
        for len in [0, 1, 15, 17, 4100] {
            let data = plaintext(len);
            let decrypted = decrypt_all(encrypt(&data, &KEY, &IV), 32).await.unwrap();
            assert_eq!(decrypted, data);
        }
    }

    #[tokio::test]
    async fn test_aligned_plaintext_gets_full_padding_block() {
        let data = plaintext(64);
        let ciphertext = encrypt(&data, &KEY, &IV);
        assert_eq!(ciphertext.len(), 80);

        let mut decryptor = CbcStreamDecryptor::new(&KEY, &IV);
        assert!(decryptor.push(ciphertext).unwrap().is_none());
        assert_eq!(decryptor.held[64..], [16u8; 16]);
        assert_eq!(decryptor.finish().unwrap(), data);
    }

    #[tokio::test]
    async fn test_short_reads() {
        let data = plaintext(1000);
        let ciphertext = encrypt(&data, &KEY, &IV);

        let (mut writer, reader) = unbounded_pipe();
        for chunk in ciphertext.chunks(7) {
            writer.write(Bytes::copy_from_slice(chunk)).await.unwrap();
        }
        drop(writer);

        let mut stream = decrypt_stream(reader, KEY, IV, 64);
        let mut decrypted = Vec::new();
        stream.read_to_end(&mut decrypted).await.unwrap();
        assert_eq!(decrypted, data);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        assert!(decrypt_all(Vec::new(), 32).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tampered_padding_block() {
        let data = plaintext(64);
        let mut ciphertext = encrypt(&data, &KEY, &IV);
        // flipping a bit in the previous ciphertext block flips the same bit
        // of the final plaintext block: the pad byte becomes 16 ^ 0x20
        let index = ciphertext.len() - BLOCK_SIZE - 1;
        ciphertext[index] ^= 0x20;

        let error = decrypt_all(ciphertext, 32).await.unwrap_err();
        assert!(matches!(error, CatError::InvalidPadLength(0x30)));
        assert_eq!(error.kind(), ErrorKind::Integrity);
    }

    #[tokio::test]
    async fn test_tampered_final_block() {
        let data = plaintext(100);
        let ciphertext = encrypt(&data, &KEY, &IV);

        let mut failures = 0;
        for offset in 1..=BLOCK_SIZE {
            let mut tampered = ciphertext.clone();
            let index = tampered.len() - offset;
            tampered[index] ^= 0x5A;
            if let Err(e) = decrypt_all(tampered, 32).await {
                assert_eq!(e.kind(), ErrorKind::Integrity);
                failures += 1;
            }
        }
        assert!(failures >= BLOCK_SIZE - 2, "only {failures} tamperings detected");
    }

    #[tokio::test]
    async fn test_truncated_ciphertext() {
        let ciphertext = encrypt(&plaintext(64), &KEY, &IV);

        let error = decrypt_all(ciphertext[..ciphertext.len() - 3].to_vec(), 32)
            .await
            .unwrap_err();
        assert!(matches!(error, CatError::UnalignedCiphertext(13)));

        let error = decrypt_all(ciphertext[..5].to_vec(), 32).await.unwrap_err();
        assert!(matches!(error, CatError::BlockTooSmall(5)));
    }

    #[tokio::test]
    async fn test_read_error_propagates() {
        let (mut writer, reader) = unbounded_pipe();
        writer
            .write(Bytes::from(encrypt(&plaintext(64), &KEY, &IV)))
            .await
            .unwrap();
        writer
            .close_with_error(CatError::HttpError(reqwest::StatusCode::BAD_GATEWAY))
            .await;

        let mut stream = decrypt_stream(reader, KEY, IV, 32);
        let mut decrypted = Vec::new();
        let error = stream.read_to_end(&mut decrypted).await.unwrap_err();
        assert!(matches!(CatError::from_io(error), CatError::HttpError(_)));
    }
}
