//! バイト列と値の相互変換を担う基本コンポーネント
//!
//! このクレートの全てのワイヤーフォーマット処理は、
//! このモジュールの [`Encode`] / [`Decode`] トレイトの上に構築される。
#[cfg(feature = "std")]
use std::{backtrace::Backtrace, panic::Location};

#[cfg(not(feature = "std"))]
use alloc::{format, string::String, vec, vec::Vec};

use core::num::{NonZeroU16, NonZeroU32};

use crate::BoxType;

/// このライブラリ用の Result 型
pub type Result<T> = core::result::Result<T, Error>;

/// エンコード/デコード操作のエラーの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 入力バッファが、宣言されたサイズや固定長フィールドに対して短すぎる
    Truncated,

    /// サイズ・バージョン・フラグなどの組み合わせが仕様上あり得ない
    Malformed,

    /// 値が仕様で定められた範囲を超えている
    OutOfRange,

    /// 提供されたバッファがエンコード結果を保持するのに小さすぎる
    InsufficientBuffer,

    /// 構造としては完全だが、意味的に不完全である（バリデーター用）
    InvariantViolation,
}

/// エラー型
///
/// 未知のボックスや未知の LOC ヘッダー拡張はエラーにはならず、
/// デコード結果のツリー上にそのまま保持される点に注意
/// （`unknown_boxes` フィールドや `Unknown` バリアントを参照）。
pub struct Error {
    /// 発生したエラーの種類
    pub kind: ErrorKind,

    /// エラーが発生した理由
    pub reason: String,

    /// エラーが作成されたソースコードの場所
    #[cfg(feature = "std")]
    pub location: &'static Location<'static>,

    /// エラーが発生したボックスの種類
    pub box_type: Option<BoxType>,

    /// エラー発生箇所を示すバックトレース
    ///
    /// バックトレースは `RUST_BACKTRACE` 環境変数が設定されていない場合には取得されない
    #[cfg(feature = "std")]
    pub backtrace: Backtrace,
}

impl Error {
    /// [`Error`] インスタンスを生成する
    #[track_caller]
    pub fn new(kind: ErrorKind) -> Self {
        Self::with_reason(kind, String::new())
    }

    /// エラー理由つきで [`Error`] インスタンスを生成する
    #[track_caller]
    pub fn with_reason<T: Into<String>>(kind: ErrorKind, reason: T) -> Self {
        Self {
            kind,
            reason: reason.into(),
            #[cfg(feature = "std")]
            location: Location::caller(),
            box_type: None,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    #[track_caller]
    pub(crate) fn truncated<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::Truncated, reason)
    }

    #[track_caller]
    pub(crate) fn malformed<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::Malformed, reason)
    }

    #[track_caller]
    pub(crate) fn out_of_range<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::OutOfRange, reason)
    }

    #[track_caller]
    pub(crate) fn invariant_violation<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::InvariantViolation, reason)
    }

    #[track_caller]
    pub(crate) fn insufficient_buffer() -> Self {
        Self::new(ErrorKind::InsufficientBuffer)
    }

    /// エンコード先のバッファサイズを確認する
    #[track_caller]
    pub(crate) fn check_buffer_size(required_size: usize, buf: &[u8]) -> Result<()> {
        if buf.len() < required_size {
            Err(Self::insufficient_buffer())
        } else {
            Ok(())
        }
    }

    /// デコード元のバッファに必要なバイト数が残っているかを確認する
    #[track_caller]
    pub(crate) fn check_remaining(required_size: usize, buf: &[u8]) -> Result<()> {
        if buf.len() < required_size {
            Err(Self::truncated(format!(
                "Unexpected end of input: required={required_size}, remaining={}",
                buf.len()
            )))
        } else {
            Ok(())
        }
    }
}

impl core::fmt::Debug for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self}")
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(ty) = self.box_type {
            write!(f, "[{ty}] ")?;
        }

        write!(f, "{:?}: {}", self.kind, self.reason)?;

        #[cfg(feature = "std")]
        {
            write!(f, " (at {}:{})", self.location.file(), self.location.line())?;
            if self.backtrace.status() == std::backtrace::BacktraceStatus::Captured {
                write!(f, "\n\nBacktrace:\n{}", self.backtrace)?;
            }
        }

        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// バイト列に変換可能な型を表現するためのトレイト
pub trait Encode {
    /// `self` をバイト列に変換して `buf` に書きこむ
    ///
    /// 返り値は、変換後のバイト列のサイズで、
    /// もし `buf` のサイズが不足している場合には [`ErrorKind::InsufficientBuffer`] エラーが返される
    fn encode(&self, buf: &mut [u8]) -> Result<usize>;

    /// `self` をバイト列に変換して、変換後のバイト列を返す
    fn encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0; 64];
        loop {
            match self.encode(&mut buf) {
                Ok(size) => {
                    buf.truncate(size);
                    return Ok(buf);
                }
                Err(e) if e.kind == ErrorKind::InsufficientBuffer => {
                    buf.resize(buf.len() * 2, 0);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Encode for u8 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(1, buf)?;
        buf[0] = *self;
        Ok(1)
    }
}

impl Encode for u16 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(2, buf)?;
        buf[..2].copy_from_slice(&self.to_be_bytes());
        Ok(2)
    }
}

impl Encode for u32 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(4, buf)?;
        buf[..4].copy_from_slice(&self.to_be_bytes());
        Ok(4)
    }
}

impl Encode for u64 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(8, buf)?;
        buf[..8].copy_from_slice(&self.to_be_bytes());
        Ok(8)
    }
}

impl Encode for i8 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(1, buf)?;
        buf[0] = *self as u8;
        Ok(1)
    }
}

impl Encode for i16 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(2, buf)?;
        buf[..2].copy_from_slice(&self.to_be_bytes());
        Ok(2)
    }
}

impl Encode for i32 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(4, buf)?;
        buf[..4].copy_from_slice(&self.to_be_bytes());
        Ok(4)
    }
}

impl Encode for i64 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(8, buf)?;
        buf[..8].copy_from_slice(&self.to_be_bytes());
        Ok(8)
    }
}

impl Encode for NonZeroU16 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.get().encode(buf)
    }
}

impl Encode for NonZeroU32 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.get().encode(buf)
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        for item in self {
            offset += item.encode(&mut buf[offset..])?;
        }
        Ok(offset)
    }
}

impl Encode for [u8] {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(self.len(), buf)?;
        buf[..self.len()].copy_from_slice(self);
        Ok(self.len())
    }
}

/// バイト列から `Self` に変換するためのトレイト
pub trait Decode: Sized {
    /// バイト列からこの型の値をデコードする
    ///
    /// 成功時には、デコードされた値とデコードに消費されたバイト数のタプルが、
    /// 失敗時には [`Error`] が返される
    fn decode(buf: &[u8]) -> Result<(Self, usize)>;

    /// オフセット位置からバイト列をデコードし、オフセットを自動で進める
    fn decode_at(buf: &[u8], offset: &mut usize) -> Result<Self> {
        let (decoded, size) = Self::decode(&buf[*offset..])?;
        *offset += size;
        Ok(decoded)
    }
}

impl Decode for u8 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_remaining(1, buf)?;
        Ok((buf[0], 1))
    }
}

impl Decode for u16 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_remaining(2, buf)?;
        Ok((Self::from_be_bytes([buf[0], buf[1]]), 2))
    }
}

impl Decode for u32 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_remaining(4, buf)?;
        Ok((Self::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]), 4))
    }
}

impl Decode for u64 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_remaining(8, buf)?;
        let bytes = [
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ];
        Ok((Self::from_be_bytes(bytes), 8))
    }
}

impl Decode for i8 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_remaining(1, buf)?;
        Ok((buf[0] as i8, 1))
    }
}

impl Decode for i16 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_remaining(2, buf)?;
        Ok((Self::from_be_bytes([buf[0], buf[1]]), 2))
    }
}

impl Decode for i32 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_remaining(4, buf)?;
        Ok((Self::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]), 4))
    }
}

impl Decode for i64 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_remaining(8, buf)?;
        let bytes = [
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ];
        Ok((Self::from_be_bytes(bytes), 8))
    }
}

impl Decode for NonZeroU16 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (v, size) = u16::decode(buf)?;
        NonZeroU16::new(v)
            .map(|nz| (nz, size))
            .ok_or_else(|| Error::malformed("Expected a non-zero integer, but got 0"))
    }
}

impl Decode for NonZeroU32 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (v, size) = u32::decode(buf)?;
        NonZeroU32::new(v)
            .map(|nz| (nz, size))
            .ok_or_else(|| Error::malformed("Expected a non-zero integer, but got 0"))
    }
}

impl<T: Decode + Default + Copy, const N: usize> Decode for [T; N] {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut items = [T::default(); N];
        let mut offset = 0;

        for item in &mut items {
            *item = T::decode_at(buf, &mut offset)?;
        }

        Ok((items, offset))
    }
}

/// [RFC 9000] QUIC 形式の可変長整数
///
/// 先頭バイトの上位 2 ビットがエンコード長（1/2/4/8 バイト）を表し、
/// 残りのビットが値（それぞれ 6/14/30/62 ビット幅）を格納する。
/// エンコード時には、値が収まる最短の形式が常に選択される。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Varint(u64);

impl Varint {
    /// 表現可能な最大値 (2^62 - 1)
    pub const MAX: u64 = (1 << 62) - 1;

    /// [`Varint`] インスタンスを生成する
    ///
    /// 値が [`Varint::MAX`] を超える場合には [`None`] が返される
    pub const fn new(value: u64) -> Option<Self> {
        if value > Self::MAX { None } else { Some(Self(value)) }
    }

    /// 値を取得する
    pub const fn get(self) -> u64 {
        self.0
    }

    /// エンコード後のバイト数を返す
    pub const fn external_size(self) -> usize {
        if self.0 < 1 << 6 {
            1
        } else if self.0 < 1 << 14 {
            2
        } else if self.0 < 1 << 30 {
            4
        } else {
            8
        }
    }
}

impl Encode for Varint {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.external_size();
        Error::check_buffer_size(size, buf)?;
        match size {
            1 => buf[0] = self.0 as u8,
            2 => buf[..2].copy_from_slice(&((self.0 as u16) | 0b01 << 14).to_be_bytes()),
            4 => buf[..4].copy_from_slice(&((self.0 as u32) | 0b10 << 30).to_be_bytes()),
            _ => buf[..8].copy_from_slice(&(self.0 | 0b11 << 62).to_be_bytes()),
        }
        Ok(size)
    }
}

impl Decode for Varint {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_remaining(1, buf)?;
        let size = 1 << (buf[0] >> 6);
        Error::check_remaining(size, buf)?;

        let mut value = (buf[0] & 0b0011_1111) as u64;
        for b in &buf[1..size] {
            value = (value << 8) | *b as u64;
        }
        Ok((Self(value), size))
    }
}
