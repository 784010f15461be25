// 归档编解码
//
// - dump: 单个集合的 JSON Lines 导出
// - media: 媒体目录的嵌套压缩容器
// - manifest: 归档清单与校验
// - archive: 最终归档的打包、解包和校验

pub mod archive;
pub mod checksum;
pub mod dump;
pub mod manifest;
pub mod media;

pub use archive::{OpenedArchive, PackedArchive, open_archive, pack_archive, verify_archive};
pub use dump::{
    DumpHeader, DumpReader, DumpSummary, DumpWriter, deserialize_collection, read_dump_header,
    serialize_collection,
};
pub use manifest::{ArchiveManifest, CollectionEntry, MediaEntry};
pub use media::{
    MediaFileEntry, MediaManifest, MediaRestoreReport, SkippedFile, archive_media, extract_media,
    media_tree_checksum,
};
