use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

/// Options from a JSON file; absent fields keep their defaults
pub fn read_json_options<T: DeserializeOwned + Default>(file: Option<&str>) -> anyhow::Result<T> {
    match file {
        Some(file) => {
            let reader = BufReader::new(
                File::open(file).map_err(|e| anyhow::anyhow!("cannot open {}: {}", file, e))?,
            );
            Ok(serde_json::from_reader(reader)?)
        }
        None => Ok(T::default()),
    }
}

/// Write `value` to `{out}.json`
pub fn write_json<T: Serialize>(value: &T, out: &str) -> anyhow::Result<Box<str>> {
    let file_path: Box<str> = format!("{}.json", out).into();
    let mut writer = BufWriter::new(File::create(&*file_path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(file_path)
}
