use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::{DeviceOverview, TargetInfo};

pub const PARAM_PRODUCT_NAME: &str = "const.product.name";
pub const PARAM_PRODUCT_BRAND: &str = "const.product.brand";
pub const PARAM_PRODUCT_MODEL: &str = "const.product.model";
pub const PARAM_CPU_ABI_LIST: &str = "const.product.cpu.abilist";
pub const PARAM_SOFTWARE_VERSION: &str = "const.product.software.version";
pub const PARAM_API_VERSION: &str = "const.ohos.apiversion";

const EMPTY_TARGETS: &str = "[Empty]";

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses `hdc list targets`; one connect key per line, `[Empty]` when none.
pub fn parse_list_targets(output: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(EMPTY_TARGETS) {
            continue;
        }
        // `list targets -v` appends columns; the key is always first.
        let Some(key) = trimmed.split_whitespace().next() else {
            continue;
        };
        if !keys.iter().any(|existing| existing == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

/// Parses `param get` output (`name = value` per line).
pub fn parse_parameters(output: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for line in output.lines() {
        let Some((name, value)) = line.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            continue;
        }
        params.insert(name.to_string(), value.trim().to_string());
    }
    params
}

/// Value of the first line starting with `key`, taken after its last `:`.
pub fn prop_value(key: &str, text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| line.starts_with(key))
        .and_then(|line| {
            let value = match line.rfind(':') {
                Some(index) => &line[index + 1..],
                None => "",
            };
            non_empty(value)
        })
}

/// `"ALN-AL00 5.0.0.102(SP8C00E73R4P5)"` -> `"5.0.0.102"`.
pub fn parse_ohos_version(software_version: &str) -> Option<String> {
    let field = software_version.split_whitespace().nth(1)?;
    let version = match field.find('(') {
        Some(index) => &field[..index],
        None => field,
    };
    non_empty(version)
}

pub fn parse_kernel_version(uname: &str) -> Option<String> {
    let version = match uname.find('#') {
        Some(index) => &uname[..index],
        None => uname,
    };
    non_empty(version)
}

fn leading_number(value: &str) -> Option<u64> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Returns `(total, used)` in bytes from `/proc/meminfo`; zeros when unreadable.
pub fn parse_meminfo(meminfo: &str) -> (u64, u64) {
    let total = prop_value("MemTotal", meminfo).and_then(|value| leading_number(&value));
    let free = prop_value("MemAvailable", meminfo)
        .or_else(|| prop_value("MemFree", meminfo))
        .and_then(|value| leading_number(&value));
    match (total, free) {
        (Some(total), Some(free)) => {
            let total = total.saturating_mul(1024);
            let free = free.saturating_mul(1024);
            (total, total.saturating_sub(free))
        }
        _ => (0, 0),
    }
}

fn resolution_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"physical screen resolution: ((\d+)x(\d+))").expect("static regex")
    })
}

pub fn parse_physical_resolution(screen_dump: &str) -> Option<String> {
    resolution_regex()
        .captures(screen_dump)
        .and_then(|caps| caps.get(1))
        .map(|found| found.as_str().to_string())
}

pub fn build_target_info(key: &str, params: &HashMap<String, String>) -> TargetInfo {
    let get = |name: &str| params.get(name).and_then(|value| non_empty(value));
    TargetInfo {
        key: key.to_string(),
        name: get(PARAM_PRODUCT_NAME),
        ohos_version: params
            .get(PARAM_SOFTWARE_VERSION)
            .and_then(|value| parse_ohos_version(value)),
        sdk_version: get(PARAM_API_VERSION),
    }
}

pub fn build_overview(
    params: &HashMap<String, String>,
    device_info: &str,
    uname: &str,
    meminfo: &str,
    screen_dump: &str,
) -> DeviceOverview {
    let get = |name: &str| params.get(name).and_then(|value| non_empty(value));
    let (mem_total, mem_used) = parse_meminfo(meminfo);
    DeviceOverview {
        name: get(PARAM_PRODUCT_NAME),
        brand: get(PARAM_PRODUCT_BRAND),
        model: get(PARAM_PRODUCT_MODEL),
        abi: get(PARAM_CPU_ABI_LIST),
        serial_num: prop_value("sn", device_info),
        kernel_version: parse_kernel_version(uname),
        processor: prop_value("deviceTypeName", device_info),
        mem_total,
        mem_used,
        physical_resolution: parse_physical_resolution(screen_dump),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_target_list() {
        let output = "FMR0223C13000649\n127.0.0.1:5555\tTCP\tConnected\n\nFMR0223C13000649\n";
        assert_eq!(
            parse_list_targets(output),
            vec!["FMR0223C13000649".to_string(), "127.0.0.1:5555".to_string()]
        );
        assert!(parse_list_targets("[Empty]\n\n").is_empty());
        assert!(parse_list_targets("").is_empty());
    }

    #[test]
    fn parses_parameter_lines() {
        let output = "const.product.name = HUAWEI Mate 60 Pro\n\
                      const.ohos.apiversion = 12\n\
                      persist.sys.extra = a=b\n\
                      garbage line\n";
        let params = parse_parameters(output);
        assert_eq!(params.get(PARAM_PRODUCT_NAME).map(String::as_str), Some("HUAWEI Mate 60 Pro"));
        assert_eq!(params.get(PARAM_API_VERSION).map(String::as_str), Some("12"));
        assert_eq!(params.get("persist.sys.extra").map(String::as_str), Some("a=b"));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn prop_value_takes_text_after_last_colon() {
        let info = "  sn: 2PM0223A1000123\ndeviceTypeName: Kirin 9000S\nmac: aa:bb:cc\n";
        assert_eq!(prop_value("sn", info).as_deref(), Some("2PM0223A1000123"));
        assert_eq!(prop_value("deviceTypeName", info).as_deref(), Some("Kirin 9000S"));
        assert_eq!(prop_value("mac", info).as_deref(), Some("cc"));
        assert_eq!(prop_value("missing", info), None);
    }

    #[test]
    fn parses_ohos_version() {
        assert_eq!(
            parse_ohos_version("ALN-AL00 5.0.0.102(SP8C00E73R4P5)").as_deref(),
            Some("5.0.0.102")
        );
        assert_eq!(parse_ohos_version("OpenHarmony 4.1.7.5").as_deref(), Some("4.1.7.5"));
        assert_eq!(parse_ohos_version("OpenHarmony"), None);
    }

    #[test]
    fn parses_kernel_version() {
        assert_eq!(
            parse_kernel_version("Linux localhost 5.10.184 #1 SMP PREEMPT").as_deref(),
            Some("Linux localhost 5.10.184")
        );
        assert_eq!(parse_kernel_version("  "), None);
    }

    #[test]
    fn parses_meminfo_with_fallback_to_mem_free() {
        let with_available = "MemTotal:       11796748 kB\nMemFree:  100 kB\nMemAvailable:    5796748 kB\n";
        assert_eq!(
            parse_meminfo(with_available),
            (11_796_748 * 1024, 6_000_000 * 1024)
        );
        let free_only = "MemTotal: 2000 kB\nMemFree: 500 kB\n";
        assert_eq!(parse_meminfo(free_only), (2000 * 1024, 1500 * 1024));
        assert_eq!(parse_meminfo("nothing here"), (0, 0));
    }

    #[test]
    fn parses_physical_resolution() {
        let dump = "screen[0]: id=0\n  physical screen resolution: 1260x2720\n";
        assert_eq!(parse_physical_resolution(dump).as_deref(), Some("1260x2720"));
        assert_eq!(parse_physical_resolution("no screens"), None);
    }

    #[test]
    fn builds_target_info_from_parameters() {
        let params = parse_parameters(
            "const.product.name = Mate 60\n\
             const.product.software.version = ALN-AL00 5.0.0.102(SP8)\n\
             const.ohos.apiversion = 12\n",
        );
        let info = build_target_info("FMR0223C13000649", &params);
        assert_eq!(info.key, "FMR0223C13000649");
        assert_eq!(info.name.as_deref(), Some("Mate 60"));
        assert_eq!(info.ohos_version.as_deref(), Some("5.0.0.102"));
        assert_eq!(info.sdk_version.as_deref(), Some("12"));
    }
}
