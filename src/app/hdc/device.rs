use std::fs;

use tracing::warn;

use crate::app::error::AppError;
use crate::app::hdc::gateway::{DeviceGateway, GatewayOutcome};
use crate::app::hdc::parse::{build_overview, build_target_info};
use crate::app::models::{DeviceOverview, TargetInfo};
use crate::app::ui_capture::image_bytes_to_data_url;

pub const REMOTE_TMP_DIR: &str = "/data/local/tmp";
pub const SCREENCAP_NAME: &str = "haro_screen.jpeg";
pub const LAYOUT_NAME: &str = "haro_layout.json";

pub fn list_target_infos(gateway: &dyn DeviceGateway, trace_id: &str) -> GatewayOutcome<Vec<TargetInfo>> {
    let result = gateway.list_targets(trace_id).and_then(|keys| {
        keys.iter()
            .map(|key| {
                let params = gateway.get_parameters(key, trace_id)?;
                Ok(build_target_info(key, &params))
            })
            .collect::<Result<Vec<_>, AppError>>()
    });
    if let Err(err) = &result {
        warn!(trace_id = %trace_id, error = %err, "failed to list targets");
    }
    GatewayOutcome::from_result(result)
}

pub fn fetch_overview(
    gateway: &dyn DeviceGateway,
    key: &str,
    trace_id: &str,
) -> Result<DeviceOverview, AppError> {
    let params = gateway.get_parameters(key, trace_id)?;
    let outputs = gateway.shell_batch(
        key,
        &[
            "SP_daemon -deviceinfo",
            "uname -a",
            "cat /proc/meminfo",
            "hidumper -s RenderService -a screen",
        ],
        trace_id,
    )?;
    let output = |index: usize| outputs.get(index).map(String::as_str).unwrap_or_default();
    Ok(build_overview(
        &params,
        output(0),
        output(1),
        output(2),
        output(3),
    ))
}

pub fn input_key(
    gateway: &dyn DeviceGateway,
    key: &str,
    key_code: u32,
    trace_id: &str,
) -> Result<(), AppError> {
    gateway.shell(key, &format!("uinput -K -d {key_code} -u {key_code}"), trace_id)?;
    Ok(())
}

/// Produces `name` on the device with `producer`, then pulls it back as bytes.
fn capture_remote_file(
    gateway: &dyn DeviceGateway,
    key: &str,
    name: &str,
    producer: &str,
    trace_id: &str,
) -> Result<Vec<u8>, AppError> {
    let remote = format!("{REMOTE_TMP_DIR}/{name}");
    gateway.shell_batch(
        key,
        &[&format!("rm -r {remote}"), &format!("{producer} {remote}")],
        trace_id,
    )?;

    let temp_dir = tempfile::tempdir()
        .map_err(|err| AppError::system(format!("Failed to create temp dir: {err}"), trace_id))?;
    let local = temp_dir.path().join(name);
    gateway.recv_file(key, &remote, &local, trace_id)?;
    fs::read(&local)
        .map_err(|err| AppError::system(format!("Failed to read {name}: {err}"), trace_id))
}

/// Screenshot of display 0 as an image data URL.
pub fn screencap(gateway: &dyn DeviceGateway, key: &str, trace_id: &str) -> Result<String, AppError> {
    let bytes = capture_remote_file(gateway, key, SCREENCAP_NAME, "snapshot_display -i 0 -f", trace_id)?;
    image_bytes_to_data_url(&bytes).map_err(|message| AppError::dependency(message, trace_id))
}

/// Raw JSON layout dump as reported by `uitest dumpLayout`.
pub fn dump_layout(gateway: &dyn DeviceGateway, key: &str, trace_id: &str) -> Result<String, AppError> {
    let bytes = capture_remote_file(gateway, key, LAYOUT_NAME, "uitest dumpLayout -p", trace_id)?;
    String::from_utf8(bytes)
        .map_err(|err| AppError::parse(format!("Layout dump is not UTF-8: {err}"), trace_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::hdc::fake::FakeGateway;
    use crate::app::hdc::parse::{PARAM_API_VERSION, PARAM_PRODUCT_NAME, PARAM_SOFTWARE_VERSION};

    #[test]
    fn lists_targets_with_parameters() {
        let gateway = FakeGateway::with_targets(&["A", "B"]);
        gateway.set_parameters(
            "A",
            &[
                (PARAM_PRODUCT_NAME, "Mate 60"),
                (PARAM_SOFTWARE_VERSION, "ALN-AL00 5.0.0.102(SP8)"),
                (PARAM_API_VERSION, "12"),
            ],
        );
        gateway.set_parameters("B", &[(PARAM_PRODUCT_NAME, "rk3568")]);

        let targets = list_target_infos(&gateway, "trace").ready().expect("ready");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].ohos_version.as_deref(), Some("5.0.0.102"));
        assert_eq!(targets[1].name.as_deref(), Some("rk3568"));
        assert_eq!(targets[1].sdk_version, None);
    }

    #[test]
    fn gateway_failure_degrades_to_unavailable() {
        let gateway = FakeGateway::new();
        gateway.fail_targets("hdc server not running");
        let outcome = list_target_infos(&gateway, "trace");
        assert_eq!(outcome.reason(), Some("hdc server not running"));

        // A target whose parameters cannot be read fails the whole listing.
        let gateway = FakeGateway::with_targets(&["A"]);
        assert!(!list_target_infos(&gateway, "trace").is_ready());
    }

    #[test]
    fn overview_combines_parameters_and_shell_output() {
        let gateway = FakeGateway::with_targets(&["A"]);
        gateway.set_parameters("A", &[(PARAM_PRODUCT_NAME, "Mate 60"), ("const.product.brand", "HUAWEI")]);
        gateway.set_shell_output("SP_daemon -deviceinfo", "sn: 2PM0\ndeviceTypeName: Kirin\n");
        gateway.set_shell_output("uname -a", "Linux localhost 5.10.184 #1 SMP");
        gateway.set_shell_output("cat /proc/meminfo", "MemTotal: 4 kB\nMemAvailable: 1 kB\n");
        gateway.set_shell_output(
            "hidumper -s RenderService -a screen",
            "physical screen resolution: 1260x2720",
        );

        let overview = fetch_overview(&gateway, "A", "trace").expect("overview");
        assert_eq!(overview.name.as_deref(), Some("Mate 60"));
        assert_eq!(overview.brand.as_deref(), Some("HUAWEI"));
        assert_eq!(overview.serial_num.as_deref(), Some("2PM0"));
        assert_eq!(overview.processor.as_deref(), Some("Kirin"));
        assert_eq!(overview.kernel_version.as_deref(), Some("Linux localhost 5.10.184"));
        assert_eq!(overview.mem_total, 4096);
        assert_eq!(overview.mem_used, 3072);
        assert_eq!(overview.physical_resolution.as_deref(), Some("1260x2720"));
    }

    #[test]
    fn input_key_sends_down_and_up() {
        let gateway = FakeGateway::with_targets(&["A"]);
        input_key(&gateway, "A", 2, "trace").expect("input");
        assert_eq!(
            gateway.shell_log(),
            vec![("A".to_string(), "uinput -K -d 2 -u 2".to_string())]
        );
    }

    #[test]
    fn screencap_pulls_the_snapshot() {
        let gateway = FakeGateway::with_targets(&["A"]);
        gateway.set_remote_file(
            "/data/local/tmp/haro_screen.jpeg",
            &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10],
        );
        let url = screencap(&gateway, "A", "trace").expect("screencap");
        assert!(url.starts_with("data:image/jpeg;base64,"));
        let commands: Vec<String> = gateway.shell_log().into_iter().map(|(_, cmd)| cmd).collect();
        assert_eq!(
            commands,
            vec![
                "rm -r /data/local/tmp/haro_screen.jpeg".to_string(),
                "snapshot_display -i 0 -f /data/local/tmp/haro_screen.jpeg".to_string(),
            ]
        );
    }

    #[test]
    fn dump_layout_reads_json_text() {
        let gateway = FakeGateway::with_targets(&["A"]);
        gateway.set_remote_file("/data/local/tmp/haro_layout.json", br#"{"attributes":{}}"#);
        let raw = dump_layout(&gateway, "A", "trace").expect("dump");
        assert_eq!(raw, r#"{"attributes":{}}"#);

        let missing = FakeGateway::with_targets(&["A"]);
        let err = screencap(&missing, "A", "trace").expect_err("no file");
        assert_eq!(err.code, "ERR_DEPENDENCY");
    }
}
