use crate::macros::enum_with_unknown;

enum_with_unknown! {
    /// IPv4 `protocol` field (IANA assigned numbers, the small subset this stack understands).
    pub enum Protocol(u8) {
        Icmp = 1,
        Tcp = 6,
        Udp = 17,
    }
}
