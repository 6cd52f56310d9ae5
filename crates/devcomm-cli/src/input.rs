//! Line format read by the gateway: `<deviceId> <deviceModel> <hexFrame>`.

use devcomm_core::DeviceId;
use devcomm_dispatch::IngestRequest;
use devcomm_protocol::decode_hex;

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> anyhow::Result<Option<IngestRequest>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.split_whitespace();
    let (Some(device), Some(model), Some(hex)) = (fields.next(), fields.next(), fields.next())
    else {
        anyhow::bail!("expected `<deviceId> <deviceModel> <hexFrame>`, got {line:?}");
    };
    if fields.next().is_some() {
        anyhow::bail!("unexpected trailing fields in {line:?}");
    }

    let device_id: DeviceId = device.parse()?;
    let frame = decode_hex(hex)?;
    Ok(Some(IngestRequest::new(device_id, model, frame)))
}
