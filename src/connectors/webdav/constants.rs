// WebDAV 客户端使用的协议常量

pub const METHOD_PROPFIND: &[u8] = b"PROPFIND";
pub const METHOD_MKCOL: &[u8] = b"MKCOL";
pub const METHOD_MOVE: &[u8] = b"MOVE";

pub const HEADER_DEPTH: &str = "Depth";
pub const HEADER_DESTINATION: &str = "Destination";
pub const HEADER_OVERWRITE: &str = "Overwrite";

pub const CONTENT_TYPE_XML: &str = "application/xml; charset=utf-8";

pub const PROPFIND_BODY: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
<D:propfind xmlns:D=\"DAV:\"><D:prop>\
<D:resourcetype/><D:getcontentlength/><D:getlastmodified/><D:getcontenttype/>\
</D:prop></D:propfind>";
