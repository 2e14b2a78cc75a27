use crate::config::GUID_LENGTH;

pub type PeerId = [u8; GUID_LENGTH];

/// A datagram that carries only the sender's peer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    guid: PeerId,
}

impl Keepalive {
    pub fn guid(&self) -> &PeerId {
        &self.guid
    }
}

/// A datagram carrying a peer identifier followed by an opaque media payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    data: Vec<u8>,
}

impl MediaPacket {
    pub fn guid(&self) -> &[u8] {
        &self.data[..GUID_LENGTH]
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[GUID_LENGTH..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Keepalive(Keepalive),
    Media(MediaPacket),
    Malformed { len: usize },
}

impl Packet {
    /// Classifies a datagram purely by its length relative to [`GUID_LENGTH`].
    pub fn classify(datagram: &[u8]) -> Self {
        match datagram.len() {
            n if n < GUID_LENGTH => Packet::Malformed { len: n },
            GUID_LENGTH => {
                let mut guid = [0u8; GUID_LENGTH];
                guid.copy_from_slice(datagram);
                Packet::Keepalive(Keepalive { guid })
            }
            _ => Packet::Media(MediaPacket {
                data: datagram.to_vec(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_DATAGRAM_SIZE;

    fn datagram(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_every_length_has_exactly_one_class() {
        for len in 0..=MAX_DATAGRAM_SIZE {
            let packet = Packet::classify(&datagram(len));
            match packet {
                Packet::Malformed { len: n } => {
                    assert!(len < GUID_LENGTH);
                    assert_eq!(n, len);
                }
                Packet::Keepalive(_) => assert_eq!(len, GUID_LENGTH),
                Packet::Media(media) => {
                    assert!(len > GUID_LENGTH);
                    assert_eq!(media.as_bytes().len(), len);
                }
            }
        }
    }

    #[test]
    fn test_keepalive_keeps_identifier() {
        let data = datagram(GUID_LENGTH);
        match Packet::classify(&data) {
            Packet::Keepalive(keepalive) => assert_eq!(&keepalive.guid()[..], &data[..]),
            other => panic!("Expected keepalive, got {:?}", other),
        }
    }

    #[test]
    fn test_media_splits_identifier_and_payload() {
        let data = datagram(1024);
        match Packet::classify(&data) {
            Packet::Media(media) => {
                assert_eq!(media.guid(), &data[..GUID_LENGTH]);
                assert_eq!(media.payload(), &data[GUID_LENGTH..]);
                assert_eq!(media.into_bytes(), data);
            }
            other => panic!("Expected media, got {:?}", other),
        }
    }

    #[test]
    fn test_one_byte_payload_is_media() {
        let packet = Packet::classify(&datagram(GUID_LENGTH + 1));
        match packet {
            Packet::Media(media) => assert_eq!(media.payload().len(), 1),
            other => panic!("Expected media, got {:?}", other),
        }
    }
}
