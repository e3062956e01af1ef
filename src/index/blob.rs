use std::io::{Cursor, Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// 向量文件魔数，末字节为格式版本
pub const MAGIC: [u8; 8] = *b"VSIDX\0\0\x01";

/// 魔数 + 维度 + 数量 + 元数据摘要
pub const HEADER_SIZE: usize = 8 + 4 + 8 + 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHeader {
    pub dimension: u32,
    pub count: u64,
    /// 配对的元数据文件的 blake3 摘要
    pub metadata_digest: [u8; 32],
}

impl BlobHeader {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_u32::<LittleEndian>(self.dimension)?;
        writer.write_u64::<LittleEndian>(self.count)?;
        writer.write_all(&self.metadata_digest)
    }

    fn read<R: Read>(reader: &mut R) -> std::io::Result<Option<Self>> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Ok(None);
        }
        let dimension = reader.read_u32::<LittleEndian>()?;
        let count = reader.read_u64::<LittleEndian>()?;
        let mut metadata_digest = [0u8; 32];
        reader.read_exact(&mut metadata_digest)?;
        Ok(Some(Self { dimension, count, metadata_digest }))
    }
}

/// 将按行拼接的向量编码为二进制
pub fn encode(dimension: usize, vectors: &[f32], metadata_digest: [u8; 32]) -> Vec<u8> {
    let count = if dimension == 0 { 0 } else { vectors.len() / dimension };
    let header = BlobHeader { dimension: dimension as u32, count: count as u64, metadata_digest };

    let mut buf = Vec::with_capacity(HEADER_SIZE + vectors.len() * 4);
    // 写入 Vec 不会失败
    let _ = header.write(&mut buf);
    let start = buf.len();
    buf.resize(start + vectors.len() * 4, 0);
    LittleEndian::write_f32_into(vectors, &mut buf[start..]);
    buf
}

/// 解码向量文件，返回文件头和向量数据
pub fn decode(bytes: &[u8], expected_dimension: usize) -> Result<(BlobHeader, Vec<f32>)> {
    let mut cursor = Cursor::new(bytes);
    let header = BlobHeader::read(&mut cursor)
        .map_err(|_| Error::CorruptState("向量文件头不完整".to_owned()))?
        .ok_or_else(|| Error::CorruptState("向量文件魔数错误".to_owned()))?;

    if header.dimension as usize != expected_dimension {
        return Err(Error::CorruptState(format!(
            "向量维度为 {}，与索引维度 {} 不一致",
            header.dimension, expected_dimension
        )));
    }

    let payload = &bytes[HEADER_SIZE..];
    let expected_len = (header.count as usize)
        .checked_mul(expected_dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| Error::CorruptState("向量数量溢出".to_owned()))?;
    if payload.len() != expected_len {
        return Err(Error::CorruptState(format!(
            "向量数据长度为 {} 字节，期望 {} 字节",
            payload.len(),
            expected_len
        )));
    }

    let mut vectors = vec![0f32; payload.len() / 4];
    LittleEndian::read_f32_into(payload, &mut vectors);
    Ok((header, vectors))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_magic() {
        let mut bytes = encode(2, &[1., 2.], [0; 32]);
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes, 2), Err(Error::CorruptState(_))));
    }

    #[test]
    fn rejects_truncated_payload() {
        let bytes = encode(2, &[1., 2., 3., 4.], [7; 32]);
        assert!(matches!(decode(&bytes[..bytes.len() - 3], 2), Err(Error::CorruptState(_))));
        assert!(matches!(decode(&bytes[..10], 2), Err(Error::CorruptState(_))));
    }

    #[test]
    fn rejects_other_dimension() {
        let bytes = encode(2, &[1., 2.], [0; 32]);
        assert!(matches!(decode(&bytes, 4), Err(Error::CorruptState(_))));
    }

    #[test]
    fn header_records_digest_and_count() {
        let bytes = encode(3, &[0.; 6], [9; 32]);
        let (header, vectors) = decode(&bytes, 3).unwrap();
        assert_eq!(header.count, 2);
        assert_eq!(header.metadata_digest, [9; 32]);
        assert_eq!(vectors.len(), 6);
    }
}
