//! LOC (Low Overhead Media Container) オブジェクトを扱うモジュール
//!
//! LOC オブジェクトは、可変長整数でタグ付けされたヘッダー拡張のリストと、
//! WebCodecs の EncodedAudioChunk / EncodedVideoChunk の中身に相当する
//! 不透明なペイロードで構成される (draft-ietf-moq-loc)。
//!
//! ヘッダー拡張の値の形式は拡張 ID の偶奇で決まる:
//!
//! - 偶数 ID: 値は可変長整数一つ（長さプレフィックスなし）
//! - 奇数 ID: 可変長整数の長さプレフィックスに続く不透明なバイト列
use alloc::vec::Vec;

use crate::{Decode, Encode, Error, Result, TrackKind, Uint, Varint};

/// CaptureTimestamp 拡張の ID
pub const LOC_CAPTURE_TIMESTAMP_ID: u64 = 2;

/// VideoFrameMarking 拡張の ID
pub const LOC_VIDEO_FRAME_MARKING_ID: u64 = 4;

/// AudioLevel 拡張の ID
pub const LOC_AUDIO_LEVEL_ID: u64 = 6;

/// VideoConfig 拡張の ID
pub const LOC_VIDEO_CONFIG_ID: u64 = 13;

/// 拡張 ID の値が可変長整数一つでエンコードされるかどうかを判定する
///
/// 偶数 ID は可変長整数、奇数 ID は長さプレフィックス付きのバイト列になる
pub const fn is_varint_extension_id(id: u64) -> bool {
    id % 2 == 0
}

/// LOC ヘッダー拡張
///
/// 既知の拡張はそれぞれのバリアントに、
/// 未知の拡張は値をそのまま保持する [`UnknownHeaderExtension`] にデコードされる。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum LocHeaderExtension {
    CaptureTimestamp(CaptureTimestamp),
    VideoFrameMarking(VideoFrameMarking),
    AudioLevel(AudioLevel),
    VideoConfig(VideoConfig),
    Unknown(UnknownHeaderExtension),
}

impl LocHeaderExtension {
    /// 拡張 ID を返す
    pub fn extension_id(&self) -> u64 {
        match self {
            Self::CaptureTimestamp(_) => LOC_CAPTURE_TIMESTAMP_ID,
            Self::VideoFrameMarking(_) => LOC_VIDEO_FRAME_MARKING_ID,
            Self::AudioLevel(_) => LOC_AUDIO_LEVEL_ID,
            Self::VideoConfig(_) => LOC_VIDEO_CONFIG_ID,
            Self::Unknown(e) => e.extension_id(),
        }
    }
}

impl Encode for LocHeaderExtension {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let id = Varint::new(self.extension_id())
            .ok_or_else(|| Error::out_of_range("Extension ID exceeds the varint range"))?;
        let mut offset = id.encode(buf)?;
        match self {
            Self::CaptureTimestamp(e) => {
                offset += varint_value(e.timestamp_micros)?.encode(&mut buf[offset..])?;
            }
            Self::VideoFrameMarking(e) => {
                offset += varint_value(e.to_bits())?.encode(&mut buf[offset..])?;
            }
            Self::AudioLevel(e) => {
                offset += varint_value(e.to_bits())?.encode(&mut buf[offset..])?;
            }
            Self::VideoConfig(e) => {
                offset += varint_value(e.config.len() as u64)?.encode(&mut buf[offset..])?;
                offset += e.config.as_slice().encode(&mut buf[offset..])?;
            }
            Self::Unknown(UnknownHeaderExtension::Varint { value, .. }) => {
                offset += varint_value(*value)?.encode(&mut buf[offset..])?;
            }
            Self::Unknown(UnknownHeaderExtension::Bytes { value, .. }) => {
                offset += varint_value(value.len() as u64)?.encode(&mut buf[offset..])?;
                offset += value.as_slice().encode(&mut buf[offset..])?;
            }
        }
        Ok(offset)
    }
}

impl Decode for LocHeaderExtension {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let id = Varint::decode_at(buf, &mut offset)?.get();

        let this = match id {
            LOC_CAPTURE_TIMESTAMP_ID => {
                let timestamp_micros = Varint::decode_at(buf, &mut offset)?.get();
                Self::CaptureTimestamp(CaptureTimestamp { timestamp_micros })
            }
            LOC_VIDEO_FRAME_MARKING_ID => {
                let bits = Varint::decode_at(buf, &mut offset)?.get();
                Self::VideoFrameMarking(VideoFrameMarking::from_bits(bits))
            }
            LOC_AUDIO_LEVEL_ID => {
                let bits = Varint::decode_at(buf, &mut offset)?.get();
                Self::AudioLevel(AudioLevel::from_bits(bits))
            }
            LOC_VIDEO_CONFIG_ID => {
                let len = Varint::decode_at(buf, &mut offset)?.get() as usize;
                Error::check_remaining(len, &buf[offset..])?;
                let config = buf[offset..offset + len].to_vec();
                offset += len;
                Self::VideoConfig(VideoConfig { config })
            }
            _ if is_varint_extension_id(id) => {
                // 未知の偶数 ID は可変長整数一つを値として読み飛ばす
                let value = Varint::decode_at(buf, &mut offset)?.get();
                Self::Unknown(UnknownHeaderExtension::Varint { id, value })
            }
            _ => {
                let len = Varint::decode_at(buf, &mut offset)?.get() as usize;
                Error::check_remaining(len, &buf[offset..])?;
                let value = buf[offset..offset + len].to_vec();
                offset += len;
                Self::Unknown(UnknownHeaderExtension::Bytes { id, value })
            }
        };
        Ok((this, offset))
    }
}

fn varint_value(value: u64) -> Result<Varint> {
    Varint::new(value)
        .ok_or_else(|| Error::out_of_range("Extension value exceeds the varint range"))
}

/// [draft-ietf-moq-loc] 2.3.1 Capture Timestamp 拡張 (ID: 2)
///
/// メディアがキャプチャされた時刻を Unix エポックからのマイクロ秒数で表す。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureTimestamp {
    /// Unix エポックからの経過マイクロ秒数
    pub timestamp_micros: u64,
}

/// [draft-ietf-moq-loc] 2.3.2.2 Video Frame Marking 拡張 (ID: 4)
///
/// RFC 9626 で定義されるフレームの独立性・破棄可能性と、
/// 時間・空間レイヤーの識別子を格納する。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoFrameMarking {
    /// 他のフレームを参照せずにデコードできる独立フレームかどうか
    pub independent: bool,

    /// 破棄してもほかのフレームのデコードに影響しないかどうか
    pub discardable: bool,

    /// ベースレイヤーの同期ポイントかどうか
    pub base_layer_sync: bool,

    /// 時間レイヤー ID (0-7)
    pub temporal_layer_id: Uint<u8, 3>,

    /// 空間レイヤー ID (0-3)
    pub spatial_layer_id: Uint<u8, 2>,
}

impl VideoFrameMarking {
    /// 可変長整数の下位ビットから [`VideoFrameMarking`] インスタンスを生成する
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            independent: bits & 0x01 != 0,
            discardable: bits & 0x02 != 0,
            base_layer_sync: bits & 0x04 != 0,
            temporal_layer_id: Uint::<u8, 3>::new((bits >> 3) as u8),
            spatial_layer_id: Uint::<u8, 2>::new((bits >> 6) as u8),
        }
    }

    /// 可変長整数の値としてエンコードされるビット列を返す
    pub const fn to_bits(self) -> u64 {
        (self.independent as u64)
            | (self.discardable as u64) << 1
            | (self.base_layer_sync as u64) << 2
            | (self.temporal_layer_id.get() as u64) << 3
            | (self.spatial_layer_id.get() as u64) << 6
    }
}

/// [draft-ietf-moq-loc] 2.3.3.1 Audio Level 拡張 (ID: 6)
///
/// RFC 6464 で定義される音声レベルと音声アクティビティを格納する。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioLevel {
    /// 音声が含まれているかどうか
    pub voice_activity: bool,

    /// 音声レベル (0-127、0 が最大音量で 127 が無音)
    pub level: Uint<u8, 7>,
}

impl AudioLevel {
    /// 可変長整数の下位ビットから [`AudioLevel`] インスタンスを生成する
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            voice_activity: bits & 0x01 != 0,
            level: Uint::<u8, 7>::new((bits >> 1) as u8),
        }
    }

    /// 可変長整数の値としてエンコードされるビット列を返す
    pub const fn to_bits(self) -> u64 {
        (self.voice_activity as u64) | (self.level.get() as u64) << 1
    }
}

/// [draft-ietf-moq-loc] Video Config 拡張 (ID: 13)
///
/// コーデック固有の設定情報（例えば avcC の中身）を不透明なバイト列として格納する。
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct VideoConfig {
    /// コーデック設定のバイト列
    pub config: Vec<u8>,
}

/// このライブラリが関知しない LOC ヘッダー拡張
///
/// 値の形式は ID の偶奇から導出され、
/// デコード時に読み取った値はエンコード時にそのまま再出力される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum UnknownHeaderExtension {
    /// 偶数 ID: 可変長整数一つの値
    Varint { id: u64, value: u64 },

    /// 奇数 ID: 長さプレフィックス付きのバイト列の値
    Bytes { id: u64, value: Vec<u8> },
}

impl UnknownHeaderExtension {
    /// 拡張 ID を返す
    pub fn extension_id(&self) -> u64 {
        match self {
            Self::Varint { id, .. } => *id,
            Self::Bytes { id, .. } => *id,
        }
    }
}

/// LOC オブジェクト
///
/// ヘッダー拡張のリストと不透明なペイロードで構成される。
/// `group_id` / `object_id` / `subgroup_id` は MoQ トランスポートの識別子で、
/// LOC のワイヤーフォーマットには含まれないメタデータとして保持される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocObject {
    /// メディアの種別
    pub kind: TrackKind,

    /// ヘッダー拡張のリスト（ワイヤー上の順序を保持する）
    pub extensions: Vec<LocHeaderExtension>,

    /// コーデックのエレメンタリーストリームをそのまま格納したペイロード
    pub payload: Vec<u8>,

    /// MoQ トランスポートのグループ ID
    pub group_id: u64,

    /// MoQ トランスポートのオブジェクト ID
    pub object_id: u64,

    /// MoQ トランスポートのサブグループ ID
    pub subgroup_id: u64,
}

impl LocObject {
    /// ペイロードとメディア種別だけを指定した [`LocObject`] インスタンスを生成する
    pub fn new(kind: TrackKind, payload: Vec<u8>) -> Self {
        Self {
            kind,
            extensions: Vec::new(),
            payload,
            group_id: 0,
            object_id: 0,
            subgroup_id: 0,
        }
    }

    /// ヘッダー拡張のバイト列とペイロードのバイト列から [`LocObject`] をデコードする
    ///
    /// MoQ トランスポートではこの二つは別々のバッファとして渡される。
    /// ヘッダー拡張のブロックには外側のフレーミングがなく、
    /// バッファが尽きるまで拡張を読み続ける。
    pub fn decode(header_extensions: &[u8], payload: &[u8], kind: TrackKind) -> Result<Self> {
        let mut extensions = Vec::new();
        let mut offset = 0;
        while offset < header_extensions.len() {
            extensions.push(LocHeaderExtension::decode_at(header_extensions, &mut offset)?);
        }

        Ok(Self {
            kind,
            extensions,
            payload: payload.to_vec(),
            group_id: 0,
            object_id: 0,
            subgroup_id: 0,
        })
    }

    /// ヘッダー拡張のブロックだけをエンコードして返す
    pub fn encode_header_extensions(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        for extension in &self.extensions {
            buf.extend_from_slice(&extension.encode_to_vec()?);
        }
        Ok(buf)
    }

    /// ヘッダー拡張とペイロードを連結した形式でエンコードして返す
    pub fn encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = self.encode_header_extensions()?;
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// CaptureTimestamp 拡張の値を返す
    pub fn capture_timestamp(&self) -> Option<u64> {
        self.extensions.iter().find_map(|e| {
            if let LocHeaderExtension::CaptureTimestamp(t) = e {
                Some(t.timestamp_micros)
            } else {
                None
            }
        })
    }

    /// CaptureTimestamp 拡張を設定する（既存の値は置き換えられる）
    pub fn set_capture_timestamp(&mut self, timestamp_micros: u64) {
        self.remove_extension(LOC_CAPTURE_TIMESTAMP_ID);
        self.extensions
            .push(LocHeaderExtension::CaptureTimestamp(CaptureTimestamp {
                timestamp_micros,
            }));
    }

    /// VideoFrameMarking 拡張の値を返す
    pub fn video_frame_marking(&self) -> Option<&VideoFrameMarking> {
        self.extensions.iter().find_map(|e| {
            if let LocHeaderExtension::VideoFrameMarking(m) = e {
                Some(m)
            } else {
                None
            }
        })
    }

    /// VideoFrameMarking 拡張を設定する（既存の値は置き換えられる）
    ///
    /// 時間レイヤー ID が 0-7、空間レイヤー ID が 0-3 の範囲を超えている場合には
    /// [`ErrorKind::OutOfRange`](crate::ErrorKind::OutOfRange) エラーが返される
    pub fn set_video_frame_marking(
        &mut self,
        independent: bool,
        discardable: bool,
        base_layer_sync: bool,
        temporal_layer_id: u8,
        spatial_layer_id: u8,
    ) -> Result<()> {
        let temporal_layer_id = Uint::<u8, 3>::checked_new(temporal_layer_id)
            .ok_or_else(|| Error::out_of_range("Temporal layer ID must be 0-7"))?;
        let spatial_layer_id = Uint::<u8, 2>::checked_new(spatial_layer_id)
            .ok_or_else(|| Error::out_of_range("Spatial layer ID must be 0-3"))?;

        self.remove_extension(LOC_VIDEO_FRAME_MARKING_ID);
        self.extensions
            .push(LocHeaderExtension::VideoFrameMarking(VideoFrameMarking {
                independent,
                discardable,
                base_layer_sync,
                temporal_layer_id,
                spatial_layer_id,
            }));
        Ok(())
    }

    /// AudioLevel 拡張の値を返す
    pub fn audio_level(&self) -> Option<&AudioLevel> {
        self.extensions.iter().find_map(|e| {
            if let LocHeaderExtension::AudioLevel(l) = e {
                Some(l)
            } else {
                None
            }
        })
    }

    /// AudioLevel 拡張を設定する（既存の値は置き換えられる）
    ///
    /// 音声レベルが 0-127 の範囲を超えている場合には
    /// [`ErrorKind::OutOfRange`](crate::ErrorKind::OutOfRange) エラーが返される
    pub fn set_audio_level(&mut self, voice_activity: bool, level: u8) -> Result<()> {
        let level = Uint::<u8, 7>::checked_new(level)
            .ok_or_else(|| Error::out_of_range("Audio level must be 0-127"))?;

        self.remove_extension(LOC_AUDIO_LEVEL_ID);
        self.extensions
            .push(LocHeaderExtension::AudioLevel(AudioLevel {
                voice_activity,
                level,
            }));
        Ok(())
    }

    /// VideoConfig 拡張の値を返す
    pub fn video_config(&self) -> Option<&[u8]> {
        self.extensions.iter().find_map(|e| {
            if let LocHeaderExtension::VideoConfig(c) = e {
                Some(c.config.as_slice())
            } else {
                None
            }
        })
    }

    /// VideoConfig 拡張を設定する（既存の値は置き換えられる）
    pub fn set_video_config(&mut self, config: Vec<u8>) {
        self.remove_extension(LOC_VIDEO_CONFIG_ID);
        self.extensions
            .push(LocHeaderExtension::VideoConfig(VideoConfig { config }));
    }

    /// 他のフレームを参照せずにデコードできる独立フレームかどうかを判定する
    ///
    /// VideoFrameMarking 拡張が存在しない場合には false が返される
    pub fn is_independent_frame(&self) -> bool {
        self.video_frame_marking()
            .is_some_and(|marking| marking.independent)
    }

    fn remove_extension(&mut self, id: u64) {
        self.extensions.retain(|e| e.extension_id() != id);
    }
}
