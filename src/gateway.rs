//! Email-to-SMS gateway selection
//!
//! SMS alerts are delivered as email to `<digits>@<carrier gateway>`. When
//! the carrier is unknown every common gateway is tried in turn.

/// Gateways tried when no carrier hint matches
pub const FALLBACK_GATEWAYS: [&str; 5] = [
    "tmomail.net",
    "vtext.com",
    "txt.att.net",
    "mms.cricketwireless.net",
    "sms.cricketwireless.net",
];

const TMOBILE_GATEWAYS: [&str; 3] = ["tmomail.net", "vtext.com", "txt.att.net"];

const CRICKET_GATEWAYS: [&str; 2] = ["mms.cricketwireless.net", "sms.cricketwireless.net"];

/// Known carriers and their primary gateway
const CARRIER_GATEWAYS: &[(&str, &str)] = &[
    ("T-Mobile", "tmomail.net"),
    ("Cricket", "mms.cricketwireless.net"),
    ("AT&T", "txt.att.net"),
    ("Verizon", "vtext.com"),
    ("Sprint", "messaging.sprintpcs.com"),
    ("Boost Mobile", "sms.myboostmobile.com"),
    ("Metro PCS", "mymetropcs.com"),
    ("U.S. Cellular", "email.uscc.net"),
    ("Virgin Mobile", "vmobl.com"),
    ("Republic Wireless", "text.republicwireless.com"),
    ("Google Fi", "msg.fi.google.com"),
    ("Xfinity Mobile", "vtext.com"),
    ("Ting", "message.ting.com"),
    ("Consumer Cellular", "mailmymobile.net"),
    ("Simple Mobile", "smtext.com"),
    ("Mint Mobile", "tmomail.net"),
    ("Red Pocket", "vtext.com"),
    ("TracFone", "mmst5.tracfone.com"),
    ("Straight Talk", "vtext.com"),
    ("Page Plus", "vtext.com"),
];

/// Strip everything but digits from a phone number
pub fn normalize_number(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Lowercase alphanumerics only, so "T-Mobile", "tmobile" and "T Mobile" match
fn carrier_key(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Gateway domains to try for a carrier, in order
pub fn gateway_domains(carrier: Option<&str>) -> Vec<&'static str> {
    let Some(key) = carrier.map(carrier_key).filter(|key| !key.is_empty()) else {
        return FALLBACK_GATEWAYS.to_vec();
    };

    if key == carrier_key("T-Mobile") {
        return TMOBILE_GATEWAYS.to_vec();
    }

    if key == carrier_key("Cricket") {
        return CRICKET_GATEWAYS.to_vec();
    }

    let primary = CARRIER_GATEWAYS
        .iter()
        .find(|(name, _)| carrier_key(name) == key)
        .map(|(_, domain)| *domain);

    let mut domains: Vec<&'static str> = primary.into_iter().collect();
    for domain in FALLBACK_GATEWAYS {
        if !domains.contains(&domain) {
            domains.push(domain);
        }
    }
    domains
}

/// Full gateway addresses for a phone number, in the order they should be
/// attempted. Empty when the number contains no digits.
pub fn candidate_gateways(number: &str, carrier: Option<&str>) -> Vec<String> {
    let digits = normalize_number(number);
    if digits.is_empty() {
        return Vec::new();
    }

    gateway_domains(carrier)
        .into_iter()
        .map(|domain| format!("{digits}@{domain}"))
        .collect()
}
