//! ボックスの枠組みを構成する基本的な型を集めたモジュール
use alloc::{boxed::Box, format, string::String, vec::Vec};
use core::time::Duration;

use crate::{Decode, Encode, Error, Result};

/// ISO BMFF のボックスを表現するためのトレイト
// 単なる `Box` だと Rust の標準ライブラリのそれと名前が衝突するので変えておく
pub trait BaseBox {
    /// ボックスの種別を返す
    fn box_type(&self) -> BoxType;

    /// 未知のボックスかどうかを返す
    fn is_unknown_box(&self) -> bool {
        false
    }

    /// このボックスの子ボックスを走査するイテレーターを返す
    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>>;
}

pub(crate) fn as_box_object<B: BaseBox>(b: &B) -> &dyn BaseBox {
    b
}

/// バージョンとフラグを持つボックス（ISO/IEC 14496-12 の FullBox）を表現するためのトレイト
pub trait FullBox: BaseBox {
    /// ボックスのバージョンを返す
    fn full_box_version(&self) -> u8;

    /// ボックスのフラグを返す
    fn full_box_flags(&self) -> FullBoxFlags;
}

/// ボックスの種別
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoxType {
    /// 通常の 4 バイトの種別
    Normal([u8; 4]),

    /// `uuid` ボックス用の 16 バイトの拡張種別
    Uuid([u8; 16]),
}

impl BoxType {
    /// 種別を表すバイト列を返す
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            BoxType::Normal(ty) => &ty[..],
            BoxType::Uuid(ty) => &ty[..],
        }
    }

    /// エンコード後の種別部分のバイト数を返す
    pub const fn external_size(self) -> usize {
        if matches!(self, Self::Normal(_)) {
            4
        } else {
            4 + 16
        }
    }

    /// 種別が期待通りかどうかを確認する
    pub fn expect(self, expected: Self) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(Error::malformed(format!(
                "Expected box type {expected:?}, but got {self:?}"
            )))
        }
    }
}

impl core::fmt::Debug for BoxType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BoxType::Normal(ty) => {
                if let Ok(ty) = core::str::from_utf8(ty) {
                    f.debug_tuple("BoxType").field(&ty).finish()
                } else {
                    f.debug_tuple("BoxType").field(ty).finish()
                }
            }
            BoxType::Uuid(ty) => f.debug_tuple("BoxType").field(ty).finish(),
        }
    }
}

impl core::fmt::Display for BoxType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BoxType::Normal(ty) => {
                if let Ok(ty) = core::str::from_utf8(ty) {
                    write!(f, "{ty}")
                } else {
                    write!(f, "{ty:?}")
                }
            }
            BoxType::Uuid(ty) => {
                for b in ty {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// ボックスのサイズ（ヘッダー部分も含む）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoxSize(u64);

impl BoxSize {
    /// 「バッファの末尾まで」を表す特別なサイズ
    pub const VARIABLE_SIZE: Self = Self(0);

    /// [`BoxSize`] インスタンスを生成する
    ///
    /// サイズがヘッダー部分よりも小さい場合には [`None`] が返される
    pub const fn new(box_type: BoxType, box_size: u64) -> Option<Self> {
        if box_size == 0 {
            return Some(Self(0));
        }

        if box_size < 4 + box_type.external_size() as u64 {
            None
        } else {
            Some(Self(box_size))
        }
    }

    /// ペイロードサイズから [`BoxSize`] インスタンスを生成する
    ///
    /// サイズが 32 ビットに収まらない場合には、
    /// 64 ビットの拡張サイズの分だけヘッダーが大きくなることが考慮される
    pub const fn with_payload_size(box_type: BoxType, payload_size: u64) -> Self {
        let box_size = 4 + box_type.external_size() as u64 + payload_size;
        if box_size > u32::MAX as u64 {
            Self(box_size + 8)
        } else {
            Self(box_size)
        }
    }

    /// サイズの値を取得する
    pub const fn get(self) -> u64 {
        self.0
    }

    /// エンコード後のサイズ部分のバイト数を返す
    ///
    /// 32 ビットに収まらないサイズの場合には 64 ビットの拡張サイズが使われる
    pub const fn external_size(self) -> usize {
        if self.0 > u32::MAX as u64 { 4 + 8 } else { 4 }
    }
}

/// ボックスのヘッダー部分（サイズと種別）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxHeader {
    /// ボックス種別
    pub box_type: BoxType,

    /// ボックスサイズ
    pub box_size: BoxSize,
}

impl BoxHeader {
    /// ヘッダーの最大サイズ
    pub const MAX_SIZE: usize = (4 + 8) + (4 + 16);

    /// [`BoxHeader`] インスタンスを生成する
    pub const fn new(box_type: BoxType, box_size: BoxSize) -> Self {
        Self { box_type, box_size }
    }

    /// エンコード後にサイズ部分を埋めることを前提とした [`BoxHeader`] インスタンスを生成する
    ///
    /// [`BoxHeader::finalize_box_size()`] と対で使用する
    pub const fn new_variable_size(box_type: BoxType) -> Self {
        Self {
            box_type,
            box_size: BoxSize::VARIABLE_SIZE,
        }
    }

    /// エンコード後のヘッダー部分のバイト数を返す
    pub const fn external_size(self) -> usize {
        self.box_size.external_size() + self.box_type.external_size()
    }

    /// エンコード済みのボックス全体を受け取り、先頭のサイズ部分を実際のサイズで上書きする
    pub fn finalize_box_size(self, buf: &mut [u8]) -> Result<()> {
        let Ok(size) = u32::try_from(buf.len()) else {
            return Err(Error::out_of_range(format!(
                "Box size exceeds 32 bits: {}",
                buf.len()
            )));
        };
        size.encode(&mut buf[..4])?;
        Ok(())
    }

    /// ヘッダーとそれに続くペイロード部分のスライスをデコードする
    ///
    /// ペイロードはヘッダーに書かれたサイズで切り出される。
    /// サイズが 0（バッファ末尾まで）の場合には残り全てがペイロードになる。
    pub fn decode_header_and_payload(buf: &[u8]) -> Result<(Self, &[u8])> {
        let (header, header_size) = Self::decode(buf)?;
        if header.box_size == BoxSize::VARIABLE_SIZE {
            return Ok((header, &buf[header_size..]));
        }

        let box_size = header.box_size.get();
        if (buf.len() as u64) < box_size {
            return Err(Error::truncated(format!(
                "Buffer is shorter than the declared box size: declared={box_size}, remaining={}",
                buf.len()
            ))
            .with_box_type_of(header.box_type));
        }
        Ok((header, &buf[header_size..box_size as usize]))
    }
}

impl Encode for BoxHeader {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        let large_size = self.box_size.get() > u32::MAX as u64;
        if large_size {
            offset += 1u32.encode(&mut buf[offset..])?;
        } else {
            offset += (self.box_size.get() as u32).encode(&mut buf[offset..])?;
        }

        match self.box_type {
            BoxType::Normal(ty) => {
                offset += ty.encode(&mut buf[offset..])?;
            }
            BoxType::Uuid(ty) => {
                offset += b"uuid".encode(&mut buf[offset..])?;
                offset += ty.encode(&mut buf[offset..])?;
            }
        }

        if large_size {
            offset += self.box_size.get().encode(&mut buf[offset..])?;
        }

        Ok(offset)
    }
}

impl Decode for BoxHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let size_field = u32::decode_at(buf, &mut offset)? as u64;

        let ty = <[u8; 4]>::decode_at(buf, &mut offset)?;
        let box_type = if ty == *b"uuid" {
            BoxType::Uuid(<[u8; 16]>::decode_at(buf, &mut offset)?)
        } else {
            BoxType::Normal(ty)
        };

        let box_size = if size_field == 1 {
            let large_size = u64::decode_at(buf, &mut offset)?;
            if large_size <= u32::MAX as u64 {
                // 32 ビットに収まる値に拡張サイズを使うのは非正規形
                return Err(Error::malformed(format!(
                    "Overlong extended box size: {large_size}"
                ))
                .with_box_type_of(box_type));
            }
            large_size
        } else {
            size_field
        };
        let box_size = BoxSize::new(box_type, box_size).ok_or_else(|| {
            Error::malformed(format!(
                "Too small box size: actual={box_size}, expected={} or more",
                4 + box_type.external_size()
            ))
            .with_box_type_of(box_type)
        })?;

        Ok((Self { box_type, box_size }, offset))
    }
}

impl Error {
    fn with_box_type_of(mut self, box_type: BoxType) -> Self {
        if self.box_type.is_none() {
            self.box_type = Some(box_type);
        }
        self
    }
}

/// FullBox のフラグ（24 ビット幅）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullBoxFlags(u32);

impl FullBoxFlags {
    /// [`FullBoxFlags`] インスタンスを生成する
    ///
    /// 24 ビットに収まらない部分は無視される
    pub const fn new(flags: u32) -> Self {
        Self(flags & 0x00FF_FFFF)
    }

    /// ビット位置と真偽値の組から [`FullBoxFlags`] インスタンスを生成する
    pub fn from_flags<I>(flags: I) -> Self
    where
        I: IntoIterator<Item = (usize, bool)>,
    {
        let flags = flags
            .into_iter()
            .filter(|(_, set)| *set)
            .map(|(bit, _)| 1 << bit)
            .fold(0, |acc, bit| acc | bit);
        Self::new(flags)
    }

    /// フラグの値を取得する
    pub const fn get(self) -> u32 {
        self.0
    }

    /// 指定されたビットが立っているかどうかを判定する
    pub const fn is_set(self, bit: usize) -> bool {
        self.0 & (1 << bit) != 0
    }
}

impl Encode for FullBoxFlags {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(3, buf)?;
        buf[..3].copy_from_slice(&self.0.to_be_bytes()[1..]);
        Ok(3)
    }
}

impl Decode for FullBoxFlags {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_remaining(3, buf)?;
        Ok((
            Self(u32::from_be_bytes([0, buf[0], buf[1], buf[2]])),
            3,
        ))
    }
}

/// FullBox のバージョンとフラグをまとめたヘッダー部分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullBoxHeader {
    /// バージョン
    pub version: u8,

    /// フラグ
    pub flags: FullBoxFlags,
}

impl FullBoxHeader {
    /// ボックスから [`FullBoxHeader`] インスタンスを生成する
    pub fn from_box<B: FullBox>(b: &B) -> Self {
        Self {
            version: b.full_box_version(),
            flags: b.full_box_flags(),
        }
    }
}

impl Encode for FullBoxHeader {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = self.version.encode(buf)?;
        offset += self.flags.encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for FullBoxHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let version = u8::decode_at(buf, &mut offset)?;
        let flags = FullBoxFlags::decode_at(buf, &mut offset)?;
        Ok((Self { version, flags }, offset))
    }
}

/// 1904/1/1 からの経過秒数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mp4FileTime(u64);

impl Mp4FileTime {
    /// 1904/1/1 からの経過秒数を受け取って [`Mp4FileTime`] インスタンスを生成する
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// 1904/1/1 からの経過秒数を取得する
    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// Unix 時刻を受け取って [`Mp4FileTime`] インスタンスを生成する
    pub const fn from_unix_time(unix_time: Duration) -> Self {
        let delta = 2082844800; // 1904/1/1 から 1970/1/1 までの経過秒数
        let unix_time_secs = unix_time.as_secs();
        Self::from_secs(unix_time_secs + delta)
    }
}

impl Encode for Mp4FileTime {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.0.encode(buf)
    }
}

impl Decode for Mp4FileTime {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        u64::decode(buf).map(|(v, size)| (Self(v), size))
    }
}

/// 整数部と小数部からなる固定小数点数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixedPointNumber<I, F = I> {
    /// 整数部
    pub integer: I,

    /// 小数部
    pub fraction: F,
}

impl<I, F> FixedPointNumber<I, F> {
    /// [`FixedPointNumber`] インスタンスを生成する
    pub const fn new(integer: I, fraction: F) -> Self {
        Self { integer, fraction }
    }
}

impl<I: Encode, F: Encode> Encode for FixedPointNumber<I, F> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = self.integer.encode(buf)?;
        offset += self.fraction.encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl<I: Decode, F: Decode> Decode for FixedPointNumber<I, F> {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let integer = I::decode_at(buf, &mut offset)?;
        let fraction = F::decode_at(buf, &mut offset)?;
        Ok((Self { integer, fraction }, offset))
    }
}

/// ビット幅が制限された符号なし整数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uint<T, const BITS: u32>(T);

macro_rules! impl_uint {
    ($ty:ty) => {
        impl<const BITS: u32> Uint<$ty, BITS> {
            /// 最大値
            pub const MAX: $ty = ((1 as $ty) << BITS) - 1;

            /// [`Uint`] インスタンスを生成する
            ///
            /// ビット幅に収まらない部分は無視される
            pub const fn new(v: $ty) -> Self {
                Self(v & Self::MAX)
            }

            /// 値が範囲内に収まっているかを確認した上で [`Uint`] インスタンスを生成する
            pub const fn checked_new(v: $ty) -> Option<Self> {
                if v > Self::MAX { None } else { Some(Self(v)) }
            }

            /// 値を取得する
            pub const fn get(self) -> $ty {
                self.0
            }
        }
    };
}

impl_uint!(u8);
impl_uint!(u16);
impl_uint!(u32);

/// 二つの型のどちらかの値を保持する列挙型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Either<A, B> {
    /// A 型の値
    A(A),

    /// B 型の値
    B(B),
}

impl<A: BaseBox, B: BaseBox> BaseBox for Either<A, B> {
    fn box_type(&self) -> BoxType {
        match self {
            Self::A(x) => x.box_type(),
            Self::B(x) => x.box_type(),
        }
    }

    fn is_unknown_box(&self) -> bool {
        match self {
            Self::A(x) => x.is_unknown_box(),
            Self::B(x) => x.is_unknown_box(),
        }
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        match self {
            Self::A(x) => x.children(),
            Self::B(x) => x.children(),
        }
    }
}

/// null 終端の UTF-8 文字列
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Utf8String(String);

impl Utf8String {
    /// 空文字列
    pub const EMPTY: Self = Self(String::new());

    /// [`Utf8String`] インスタンスを生成する
    ///
    /// 文字列の途中に null 文字が含まれている場合には [`None`] が返される
    pub fn new<T: Into<String>>(s: T) -> Option<Self> {
        let s = s.into();
        if s.as_bytes().contains(&0) {
            None
        } else {
            Some(Self(s))
        }
    }

    /// 文字列への参照を取得する
    pub fn get(&self) -> &str {
        &self.0
    }

    /// null 終端を付与したバイト列に変換する
    pub fn into_null_terminated_bytes(self) -> Vec<u8> {
        let mut bytes = self.0.into_bytes();
        bytes.push(0);
        bytes
    }
}

/// メディアトラックの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// 音声トラック
    Audio,

    /// 映像トラック
    Video,
}

/// [ISO/IEC 14496-12] 8.8.3.1 で定義されるサンプルフラグ
///
/// 32 ビットのビットフィールドで、trun / tfhd ボックスの中で使用される
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleFlags {
    /// リーディングサンプルかどうか (2 ビット)
    pub is_leading: Uint<u8, 2>,

    /// 他のサンプルに依存しているかどうか (2 ビット)
    ///
    /// 1 なら他のサンプルに依存（非キーフレーム）、2 なら独立（キーフレーム）
    pub sample_depends_on: Uint<u8, 2>,

    /// 他のサンプルから依存されているかどうか (2 ビット)
    pub sample_is_depended_on: Uint<u8, 2>,

    /// 冗長な符号化があるかどうか (2 ビット)
    pub sample_has_redundancy: Uint<u8, 2>,

    /// パディング値 (3 ビット)
    pub sample_padding_value: Uint<u8, 3>,

    /// 同期サンプルではないかどうか
    pub sample_is_non_sync: bool,

    /// 劣化優先度
    pub sample_degradation_priority: u16,
}

impl SampleFlags {
    /// 全てのビットが 0 の [`SampleFlags`] インスタンスを生成する
    pub const fn empty() -> Self {
        Self::new(0)
    }

    /// 32 ビットの生の値から [`SampleFlags`] インスタンスを生成する
    ///
    /// 上位 4 ビットは予約領域なので無視される
    pub const fn new(flags: u32) -> Self {
        Self {
            is_leading: Uint::<u8, 2>::new((flags >> 26) as u8),
            sample_depends_on: Uint::<u8, 2>::new((flags >> 24) as u8),
            sample_is_depended_on: Uint::<u8, 2>::new((flags >> 22) as u8),
            sample_has_redundancy: Uint::<u8, 2>::new((flags >> 20) as u8),
            sample_padding_value: Uint::<u8, 3>::new((flags >> 17) as u8),
            sample_is_non_sync: (flags >> 16) & 1 != 0,
            sample_degradation_priority: flags as u16,
        }
    }

    /// 各フィールドの値から [`SampleFlags`] インスタンスを生成する
    pub const fn from_fields(
        is_leading: u8,
        sample_depends_on: u8,
        sample_is_depended_on: u8,
        sample_has_redundancy: u8,
        sample_padding_value: u8,
        sample_is_non_sync: bool,
        sample_degradation_priority: u16,
    ) -> Self {
        Self {
            is_leading: Uint::<u8, 2>::new(is_leading),
            sample_depends_on: Uint::<u8, 2>::new(sample_depends_on),
            sample_is_depended_on: Uint::<u8, 2>::new(sample_is_depended_on),
            sample_has_redundancy: Uint::<u8, 2>::new(sample_has_redundancy),
            sample_padding_value: Uint::<u8, 3>::new(sample_padding_value),
            sample_is_non_sync,
            sample_degradation_priority,
        }
    }

    /// 32 ビットの生の値を取得する
    pub const fn get(self) -> u32 {
        ((self.is_leading.get() as u32) << 26)
            | ((self.sample_depends_on.get() as u32) << 24)
            | ((self.sample_is_depended_on.get() as u32) << 22)
            | ((self.sample_has_redundancy.get() as u32) << 20)
            | ((self.sample_padding_value.get() as u32) << 17)
            | ((self.sample_is_non_sync as u32) << 16)
            | self.sample_degradation_priority as u32
    }

    /// 同期サンプル（キーフレーム）かどうかを判定する
    pub const fn is_sync_sample(self) -> bool {
        !self.sample_is_non_sync
    }

    /// 他のサンプルに依存しない独立したサンプルかどうかを判定する
    pub const fn is_independent(self) -> bool {
        self.sample_depends_on.get() == 2
    }

    /// 他のサンプルから依存されているサンプルかどうかを判定する
    pub const fn is_depended_upon(self) -> bool {
        self.sample_is_depended_on.get() == 1
    }
}

impl Encode for SampleFlags {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.get().encode(buf)
    }
}

impl Decode for SampleFlags {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        u32::decode(buf).map(|(v, size)| (Self::new(v), size))
    }
}
