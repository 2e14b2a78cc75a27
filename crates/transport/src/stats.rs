use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the receivers while they run.
#[derive(Debug, Default)]
pub struct ReceiveStats {
    keepalives: AtomicU64,
    media_packets: AtomicU64,
    malformed_packets: AtomicU64,
    bytes_received: AtomicU64,
    read_errors: AtomicU64,
    control_messages: AtomicU64,
    decode_failures: AtomicU64,
    faults_reported: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub keepalives: u64,
    pub media_packets: u64,
    pub malformed_packets: u64,
    pub bytes_received: u64,
    pub read_errors: u64,
    pub control_messages: u64,
    pub decode_failures: u64,
    pub faults_reported: u64,
}

impl ReceiveStats {
    pub fn record_keepalive(&self, bytes: usize) {
        self.keepalives.fetch_add(1, Ordering::Relaxed);
        self.add_bytes(bytes);
    }

    pub fn record_media(&self, bytes: usize) {
        self.media_packets.fetch_add(1, Ordering::Relaxed);
        self.add_bytes(bytes);
    }

    pub fn record_malformed(&self, bytes: usize) {
        self.malformed_packets.fetch_add(1, Ordering::Relaxed);
        self.add_bytes(bytes);
    }

    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_control_message(&self, bytes: usize) {
        self.control_messages.fetch_add(1, Ordering::Relaxed);
        self.add_bytes(bytes);
    }

    pub fn record_decode_failure(&self, bytes: usize) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
        self.add_bytes(bytes);
    }

    pub fn record_fault(&self) {
        self.faults_reported.fetch_add(1, Ordering::Relaxed);
    }

    fn add_bytes(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            keepalives: self.keepalives.load(Ordering::Relaxed),
            media_packets: self.media_packets.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            control_messages: self.control_messages.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            faults_reported: self.faults_reported.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_records() {
        let stats = ReceiveStats::default();
        stats.record_keepalive(22);
        stats.record_media(1024);
        stats.record_malformed(3);
        stats.record_control_message(12);
        stats.record_decode_failure(8);
        stats.record_read_error();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.keepalives, 1);
        assert_eq!(snapshot.media_packets, 1);
        assert_eq!(snapshot.malformed_packets, 1);
        assert_eq!(snapshot.control_messages, 1);
        assert_eq!(snapshot.decode_failures, 1);
        assert_eq!(snapshot.read_errors, 1);
        assert_eq!(snapshot.bytes_received, 22 + 1024 + 3 + 12 + 8);
    }
}
