use crate::structs::*;

use std::{
    error::Error,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

const DEFAULT_STATION_NAME: &str = "My Station";

//////////////////////////////////////////////////////////
// I/O
//////////////////////////////////////////////////////////

/// Reads a station file: `{"lat": 46.948, "lon": 7.4474, "name": "Bern"}`.
pub fn read_station_file(path: &Path) -> Result<Location, Box<dyn Error + Sync + Send>> {
    let mut file_data = String::new();
    let mut file = File::open(path)?;
    file.read_to_string(&mut file_data)?;

    let mut location: Location = serde_json::from_str(&file_data)?;
    if !(-90.0..=90.0).contains(&location.latitude) || !(-180.0..=180.0).contains(&location.longitude)
    {
        Err(format!(
            "coordinates out of range: {}, {}",
            location.latitude, location.longitude
        ))?
    }
    location
        .name
        .get_or_insert_with(|| DEFAULT_STATION_NAME.to_string());
    Ok(location)
}

/// First readable station file among `paths`. Missing files are skipped
/// silently, broken ones with a warning.
pub fn first_station_file(paths: &[PathBuf]) -> Option<(PathBuf, Location)> {
    for path in paths.iter() {
        if !path.exists() {
            continue;
        }
        match read_station_file(path) {
            Ok(location) => return Some((path.to_owned(), location)),
            Err(e) => log::warn!("Error reading {}: {}", path.display(), e),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, io::Write};

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("puenktli-{}-{}", std::process::id(), name));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_station_file() {
        let path = temp_file("ok.json", r#"{"lat": 46.948, "lon": 7.4474, "name": "Bern"}"#);
        let location = read_station_file(&path).unwrap();
        assert_eq!(location.latitude, 46.948);
        assert_eq!(location.longitude, 7.4474);
        assert_eq!(location.name.as_deref(), Some("Bern"));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn name_is_optional() {
        let path = temp_file("noname.json", r#"{"lat": 47.0, "lon": 8.0}"#);
        let location = read_station_file(&path).unwrap();
        assert_eq!(location.name.as_deref(), Some("My Station"));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn accepts_quoted_coordinates() {
        let path = temp_file("quoted.json", r#"{"lat": "46.9", "lon": " 7.4", "name": "Bern"}"#);
        let location = read_station_file(&path).unwrap();
        assert_eq!(location.latitude, 46.9);
        assert_eq!(location.longitude, 7.4);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn rejects_unparseable_coordinates() {
        let path = temp_file("words.json", r#"{"lat": "north", "lon": 7.4}"#);
        assert!(read_station_file(&path).is_err());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn rejects_out_of_range() {
        let path = temp_file("range.json", r#"{"lat": 146.9, "lon": 7.4}"#);
        assert!(read_station_file(&path).is_err());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn skips_missing_and_broken_files() {
        let broken = temp_file("broken.json", "{ not json");
        let good = temp_file("good.json", r#"{"lat": 46.0, "lon": 7.0}"#);
        let missing = std::env::temp_dir().join("puenktli-does-not-exist.json");

        let (path, location) =
            first_station_file(&[missing, broken.clone(), good.clone()]).unwrap();
        assert_eq!(path, good);
        assert_eq!(location.latitude, 46.0);

        fs::remove_file(broken).unwrap();
        fs::remove_file(good).unwrap();
    }

    #[test]
    fn nothing_found() {
        let missing = std::env::temp_dir().join("puenktli-also-missing.json");
        assert!(first_station_file(&[missing]).is_none());
    }
}
