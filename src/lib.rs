//! MoQ (Media over QUIC) 向けのコンテナフォーマットを扱うためのライブラリ
//!
//! 次の二つのワイヤーフォーマットのエンコード・デコードを提供する:
//!
//! - **CMAF フラグメント**: ISO BMFF (ISO/IEC 14496-12) の styp / moof / mdat の三つ組と、
//!   ftyp / moov からなる初期化セグメント
//! - **LOC オブジェクト** (draft-ietf-moq-loc): 可変長整数でタグ付けされた
//!   ヘッダー拡張リストとコーデックフレームのペイロードからなる軽量なエンベロープ
//!
//! このライブラリは純粋なコーデックであり、I/O や共有状態を持たない。
//! 全てのエントリーポイントはバイト列から値への（またはその逆の）関数で、
//! MoQ トランスポートやメディアコーデック自体は扱わない。
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod basic_types;
mod boxes_fmp4;
mod boxes_moov_tree;
mod boxes_sample_entry;
mod codec;

pub mod boxes;
pub mod fragment;
pub mod loc;
pub mod mux;

pub use basic_types::{
    BaseBox, BoxHeader, BoxSize, BoxType, Either, FixedPointNumber, FullBox, FullBoxFlags,
    FullBoxHeader, Mp4FileTime, SampleFlags, TrackKind, Uint, Utf8String,
};
pub use codec::{Decode, Encode, Error, ErrorKind, Result, Varint};
