use serde::Serialize;

#[derive(Serialize)]
pub struct FolderQuery<'a> {
    pub folder: &'a str,
}

#[derive(Serialize)]
pub struct DeviceQuery<'a> {
    pub device: &'a str,
}

#[derive(Serialize)]
pub struct EventStreamQuery {
    pub since: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    pub timeout: u64,
}
