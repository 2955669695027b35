//! Decoy recent documents
//!
//! Some macros refuse to run on machines with an empty Office MRU list. Before
//! the session starts, fake entries can be written so the host looks used.

use anyhow::{anyhow, Result};
use std::ops::Range;

/// Office applications whose MRU lists are padded
pub const OFFICE_APPS: [&str; 3] = ["Word", "Excel", "PowerPoint"];

/// Fewer recent documents than this get padded
pub const MIN_RECENT: usize = 3;

/// Range the number of fakes is drawn from
pub const FAKE_COUNT: Range<usize> = 10..16;

/// Office version ("14") from an install directory ending in "Office14"
pub fn office_version(office_dir: &str) -> Option<&str> {
    let trimmed = office_dir.trim_end_matches(['\\', '/']);
    let split = trimmed.len().checked_sub(2)?;
    let version = trimmed.get(split..)?;
    version
        .chars()
        .all(|c| c.is_ascii_digit())
        .then_some(version)
}

/// Registry path (under HKCU) of an application's MRU list
pub fn mru_key(version: &str, app: &str) -> String {
    format!("Software\\Microsoft\\Office\\{}.0\\{}\\File MRU", version, app)
}

/// Item numbers to write, given the value count of the MRU key.
///
/// One value of the key is not a document entry. Returns `None` when the list
/// already looks lived-in.
pub fn decoy_slots(value_count: usize, fakes: usize) -> Option<Range<usize>> {
    let recent = value_count.saturating_sub(1);
    if recent >= MIN_RECENT {
        return None;
    }
    Some(recent.max(1)..fakes)
}

/// Registry value for a fake document called `name`
pub fn decoy_entry(name: &str) -> String {
    format!(
        "[F00000000][T01D228AEF15B51C0][O00000000]*C:\\Documents\\{}.doc",
        name
    )
}

fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow!("random source unavailable: {}", e))?;
    Ok(buf)
}

/// `len` random lowercase letters
pub fn random_name(len: usize) -> Result<String> {
    Ok(random_bytes(len)?
        .into_iter()
        .map(|b| (b'a' + b % 26) as char)
        .collect())
}

/// Random fake count within [`FAKE_COUNT`]
pub fn random_fake_count() -> Result<usize> {
    let span = FAKE_COUNT.end - FAKE_COUNT.start;
    Ok(FAKE_COUNT.start + random_bytes(1)?[0] as usize % span)
}

/// Pad the MRU lists of every Office application; returns how many entries were written
#[cfg(target_os = "windows")]
pub fn inject(office_dir: &str) -> Result<usize> {
    let version = office_version(office_dir)
        .ok_or_else(|| anyhow!("cannot tell the Office version from {}", office_dir))?;

    let mut written = 0;
    for app in OFFICE_APPS {
        let key = mru_key(version, app);
        let existing = registry::value_count(&key).unwrap_or(0);
        let Some(slots) = decoy_slots(existing, random_fake_count()?) else {
            log::debug!("{}: {} recent documents, leaving as is", app, existing);
            continue;
        };
        for item in slots {
            let entry = decoy_entry(&random_name(8)?);
            registry::set_string(&key, &format!("Item {}", item), &entry)?;
            written += 1;
        }
        log::info!("Added decoy recent documents for {}", app);
    }
    Ok(written)
}

#[cfg(not(target_os = "windows"))]
pub fn inject(_office_dir: &str) -> Result<usize> {
    Err(anyhow!("decoy documents need the Windows registry"))
}

#[cfg(target_os = "windows")]
mod registry {
    use anyhow::{anyhow, Result};
    use windows::core::{PCWSTR, PWSTR};
    use windows::Win32::System::Registry::{
        RegCloseKey, RegCreateKeyExW, RegOpenKeyExW, RegQueryInfoKeyW, RegSetValueExW, HKEY,
        HKEY_CURRENT_USER, KEY_QUERY_VALUE, KEY_SET_VALUE, REG_OPTION_NON_VOLATILE, REG_SZ,
    };

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Number of values under `HKCU\<key>`
    pub fn value_count(key: &str) -> Result<usize> {
        let path = wide(key);
        let mut hkey = HKEY::default();
        let mut values = 0u32;
        unsafe {
            RegOpenKeyExW(HKEY_CURRENT_USER, PCWSTR(path.as_ptr()), 0, KEY_QUERY_VALUE, &mut hkey)
                .ok()
                .map_err(|e| anyhow!("open {}: {}", key, e))?;
            let queried = RegQueryInfoKeyW(
                hkey,
                PWSTR::null(),
                None,
                None,
                None,
                None,
                None,
                Some(&mut values),
                None,
                None,
                None,
                None,
            )
            .ok();
            let _ = RegCloseKey(hkey);
            queried.map_err(|e| anyhow!("query {}: {}", key, e))?;
        }
        Ok(values as usize)
    }

    /// Write a `REG_SZ` value, creating the key when missing
    pub fn set_string(key: &str, name: &str, value: &str) -> Result<()> {
        let path = wide(key);
        let name_w = wide(name);
        let data: Vec<u8> = wide(value).into_iter().flat_map(u16::to_le_bytes).collect();
        let mut hkey = HKEY::default();
        unsafe {
            RegCreateKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR(path.as_ptr()),
                0,
                PCWSTR::null(),
                REG_OPTION_NON_VOLATILE,
                KEY_SET_VALUE,
                None,
                &mut hkey,
                None,
            )
            .ok()
            .map_err(|e| anyhow!("create {}: {}", key, e))?;
            let set = RegSetValueExW(hkey, PCWSTR(name_w.as_ptr()), 0, REG_SZ, Some(&data)).ok();
            let _ = RegCloseKey(hkey);
            set.map_err(|e| anyhow!("set {}\\{}: {}", key, name, e))?;
        }
        Ok(())
    }
}
