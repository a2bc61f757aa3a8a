use crate::types::{ChecksumType, FileSpec, WorkItem};
use std::path::PathBuf;


/// Work item with one file, routed to `esgf.example.org`
pub(super) fn sample_item(instance_id: &str) -> WorkItem {
    WorkItem {
        instance_id: instance_id.to_string(),
        host: "esgf.example.org".to_string(),
        output_dir: PathBuf::from("/data").join(instance_id),
        files: vec![FileSpec {
            url: format!("https://esgf.example.org/thredds/fileServer/{instance_id}.nc"),
            filename: format!("{instance_id}.nc"),
            checksum: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            checksum_type: ChecksumType::Md5,
            size: 0,
        }],
    }
}
