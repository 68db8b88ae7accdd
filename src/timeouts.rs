pub mod secs {
    /// `/json/version` discovery request.
    pub const DISCOVERY: u64 = 5;
    /// Single CDP command round-trip.
    pub const REQUEST: u64 = 30;
}
