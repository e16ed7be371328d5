use crate::config::{Config, LauncherConfig, ManagerConfig};
use crate::error::ConfigError;

/// Lowest port a server may bind without elevated privileges.
pub const MIN_PORT: i64 = 1024;
pub const MAX_PORT: i64 = 65535;

pub const NAME_LENGTH: (usize, usize) = (1, 20);
pub const PASSWORD_LENGTH: (usize, usize) = (4, 20);

/// One year, in minutes.
pub const MAX_BACKUP_FREQUENCY: i64 = 525_600;
pub const MAX_BACKUP_RETENTION: i64 = 10_000;
/// Longest accepted `serverLocation`, matching Linux `PATH_MAX`.
pub const MAX_PATH_LENGTH: usize = 4096;

/// Checks that `value` is a usable server port.
pub fn validate_port(field: &'static str, value: i64) -> Result<u16, ConfigError> {
    if !(MIN_PORT..=MAX_PORT).contains(&value) {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min: MIN_PORT,
            max: MAX_PORT,
        });
    }
    Ok(value as u16)
}

/// Checks the character count of a text field.
pub fn validate_length(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), ConfigError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ConfigError::InvalidLength {
            field,
            len,
            min,
            max,
        });
    }
    Ok(())
}

/// Checks that a count or frequency lies in `1..=max`.
///
/// Non-positive values are an [`ConfigError::InvalidLength`], values above
/// `max` an [`ConfigError::OutOfRange`].
pub fn validate_count(field: &'static str, value: i64, max: i64) -> Result<u64, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::InvalidLength {
            field,
            len: 0,
            min: 1,
            max: max as usize,
        });
    }
    if value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min: 1,
            max,
        });
    }
    Ok(value as u64)
}

/// Validates the values passed to the dedicated server.
pub fn validate_launcher_config(launcher: &LauncherConfig) -> Result<(), ConfigError> {
    validate_port("launcher.port", launcher.port)?;
    validate_length("launcher.world", &launcher.world, NAME_LENGTH.0, NAME_LENGTH.1)?;
    validate_length("launcher.name", &launcher.name, NAME_LENGTH.0, NAME_LENGTH.1)?;
    validate_length(
        "launcher.password",
        &launcher.password,
        PASSWORD_LENGTH.0,
        PASSWORD_LENGTH.1,
    )?;
    Ok(())
}

/// Validates the manager's own settings.
pub fn validate_manager_config(manager: &ManagerConfig) -> Result<(), ConfigError> {
    validate_count(
        "manager.backupFrequency",
        manager.backup_frequency,
        MAX_BACKUP_FREQUENCY,
    )?;
    validate_count(
        "manager.backupRetention",
        manager.backup_retention,
        MAX_BACKUP_RETENTION,
    )?;
    let location_len = manager.server_location.as_os_str().len();
    if location_len == 0 || location_len > MAX_PATH_LENGTH {
        return Err(ConfigError::InvalidLength {
            field: "manager.serverLocation",
            len: location_len,
            min: 1,
            max: MAX_PATH_LENGTH,
        });
    }
    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    validate_manager_config(&config.manager)?;
    validate_launcher_config(&config.launcher)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_bounds_are_inclusive() {
        assert_eq!(validate_port("port", 1024).unwrap(), 1024);
        assert_eq!(validate_port("port", 65535).unwrap(), 65535);
        assert!(validate_port("port", 1023).is_err());
        assert!(validate_port("port", 65536).is_err());
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // four characters, eight bytes
        assert!(validate_length("password", "øøøø", 4, 20).is_ok());
    }

    #[test]
    fn test_non_positive_counts_rejected() {
        assert!(matches!(
            validate_count("manager.backupRetention", 0, MAX_BACKUP_RETENTION),
            Err(ConfigError::InvalidLength { field: "manager.backupRetention", .. })
        ));
        assert!(validate_count("manager.backupFrequency", -5, MAX_BACKUP_FREQUENCY).is_err());
        assert_eq!(
            validate_count("manager.backupFrequency", 30, MAX_BACKUP_FREQUENCY).unwrap(),
            30
        );
    }

    #[test]
    fn test_counts_have_an_upper_bound() {
        assert_eq!(
            validate_count("manager.backupFrequency", i64::MAX, MAX_BACKUP_FREQUENCY),
            Err(ConfigError::OutOfRange {
                field: "manager.backupFrequency",
                value: i64::MAX,
                min: 1,
                max: MAX_BACKUP_FREQUENCY,
            })
        );
        assert!(validate_count("manager.backupFrequency", MAX_BACKUP_FREQUENCY, MAX_BACKUP_FREQUENCY).is_ok());
    }

    #[test]
    fn test_count_message_is_readable() {
        let err = validate_count("manager.backupFrequency", 0, MAX_BACKUP_FREQUENCY).unwrap_err();
        assert_eq!(
            err.to_string(),
            "manager.backupFrequency must be between 1 and 525600, got 0"
        );

        let err = validate_length("launcher.password", "abc", 4, 20).unwrap_err();
        assert_eq!(
            err.to_string(),
            "launcher.password must be between 4 and 20 characters long, got 3"
        );
    }
}
