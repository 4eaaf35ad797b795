use crate::server::info::ServerInfo;
use crate::wire::FileList;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFileList {
    pub folder: String,
    pub files: FileList,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePeer {
    pub info: ServerInfo,
    pub last_seen: DateTime<Utc>,
    pub file_list: Option<RemoteFileList>,
}

/// Peers this node has exchanged info or listings with
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<Vec<RemotePeer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `info`, replacing any entry for the same node
    pub fn remember(&self, info: ServerInfo) {
        let mut peers = self.peers.lock();
        match peers.iter_mut().find(|p| p.info.is_same_node(&info)) {
            Some(peer) => {
                peer.info = info;
                peer.last_seen = Utc::now();
            }
            None => peers.push(RemotePeer {
                info,
                last_seen: Utc::now(),
                file_list: None,
            }),
        }
    }

    pub fn record_file_list(&self, remote: SocketAddr, folder: String, files: FileList) {
        let listing = RemoteFileList {
            folder,
            files,
            received_at: Utc::now(),
        };
        let wanted = ServerInfo::from_addr(remote);

        let mut peers = self.peers.lock();
        match peers.iter_mut().find(|p| p.info.is_same_node(&wanted)) {
            Some(peer) => {
                peer.file_list = Some(listing);
                peer.last_seen = Utc::now();
            }
            None => peers.push(RemotePeer {
                info: wanted,
                last_seen: Utc::now(),
                file_list: Some(listing),
            }),
        }
    }

    pub fn find(&self, remote: SocketAddr) -> Option<RemotePeer> {
        let wanted = ServerInfo::from_addr(remote);
        self.peers
            .lock()
            .iter()
            .find(|p| p.info.is_same_node(&wanted))
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<RemotePeer> {
        self.peers.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::FileInfo;

    #[test]
    fn test_remember_deduplicates() {
        let peers = PeerRegistry::new();
        let mut info = ServerInfo::from_addr("127.0.0.1:9002".parse().unwrap());
        peers.remember(info.clone());

        info.transfer_folder = "/srv/share".into();
        peers.remember(info);

        let all = peers.snapshot();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].info.transfer_folder, "/srv/share");
    }

    #[test]
    fn test_file_list_attaches_to_peer() {
        let peers = PeerRegistry::new();
        let remote: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        peers.remember(ServerInfo::from_addr(remote));
        peers.record_file_list(
            remote,
            "/srv".into(),
            FileList::new(vec![FileInfo::new("a.bin", 10)]),
        );

        let peer = peers.find(remote).unwrap();
        assert_eq!(peer.file_list.unwrap().files.len(), 1);
        assert_eq!(peers.snapshot().len(), 1);
    }
}
