use anyhow::Result;
use std::path::Path;

pub fn check_gnss_source(source: &str, nmea_device: Option<&str>, nmea_file: Option<&str>) -> Result<()> {
    match source {
        "none" => {}
        "nmea-serial" => {
            let dev = nmea_device.filter(|d| !d.is_empty());
            anyhow::ensure!(dev.is_some(), "gnss.nmea_device missing (source = nmea-serial)");
        }
        "nmea-file" => {
            let file = nmea_file.filter(|f| !f.is_empty());
            anyhow::ensure!(file.is_some(), "gnss.nmea_file missing (source = nmea-file)");
            anyhow::ensure!(file.is_some_and(|f| Path::new(f).is_file()), "gnss.nmea_file does not exist");
        }
        other => anyhow::bail!("unknown gnss.source: {}", other),
    }
    Ok(())
}
