use serde::Serialize;

use crate::events::{CommandOption, InteractionData, PERMISSION_MANAGE_CHANNELS};
use crate::models::{Coordinate, CoordinateError, CountryCode};

pub const CREATE_MAP: &str = "create-map";
pub const REMOVE_MAP: &str = "remove-map";
pub const SET_LOCATION_ADDRESS: &str = "set-location-address";
pub const SET_LOCATION_COORDS: &str = "set-location-coords";
pub const CLEAR_LOCATION: &str = "clear-location";

const OPTION_STRING: u8 = 3;
const OPTION_NUMBER: u8 = 10;

// -- Registration payloads --

#[derive(Debug, Clone, Serialize)]
pub struct CommandDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_member_permissions: Option<String>,
    pub dm_permission: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionDefinition {
    #[serde(rename = "type")]
    pub kind: u8,
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

/// The full command surface, ready for a bulk overwrite.
pub fn definitions() -> Vec<CommandDefinition> {
    let manage_channels = Some(PERMISSION_MANAGE_CHANNELS.to_string());
    vec![
        CommandDefinition {
            name: CREATE_MAP,
            description: "Creates a DisWorld map in this channel to show user submitted locations",
            options: vec![],
            default_member_permissions: manage_channels.clone(),
            dm_permission: false,
        },
        CommandDefinition {
            name: REMOVE_MAP,
            description: "Removes DisWorld map in this channel",
            options: vec![],
            default_member_permissions: manage_channels,
            dm_permission: false,
        },
        CommandDefinition {
            name: SET_LOCATION_ADDRESS,
            description: "Sets location marker for current user in the DisWorld map in this channel by address",
            options: vec![
                OptionDefinition {
                    kind: OPTION_STRING,
                    name: "address",
                    description: "Address (accepts partial)",
                    required: true,
                },
                OptionDefinition {
                    kind: OPTION_STRING,
                    name: "country",
                    description: "Country (two letter country code)",
                    required: false,
                },
            ],
            default_member_permissions: None,
            dm_permission: false,
        },
        CommandDefinition {
            name: SET_LOCATION_COORDS,
            description: "Sets location marker for current user in the DisWorld map in this channel by lat/long coordinates",
            options: vec![
                OptionDefinition {
                    kind: OPTION_NUMBER,
                    name: "latitude",
                    description: "Latitude",
                    required: true,
                },
                OptionDefinition {
                    kind: OPTION_NUMBER,
                    name: "longitude",
                    description: "Longitude",
                    required: true,
                },
            ],
            default_member_permissions: None,
            dm_permission: false,
        },
        CommandDefinition {
            name: CLEAR_LOCATION,
            description: "Removes location marker for the current user in the DisWorld map in this channel",
            options: vec![],
            default_member_permissions: None,
            dm_permission: false,
        },
    ]
}

// -- Parsed commands --

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateMap,
    RemoveMap,
    SetLocationAddress {
        address: String,
        country: Option<CountryCode>,
    },
    SetLocationCoords(Coordinate),
    ClearLocation,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("missing option: {0}")]
    MissingOption(&'static str),
    #[error("option {0} has the wrong type")]
    InvalidOption(&'static str),
    #[error(transparent)]
    InvalidCoordinate(#[from] CoordinateError),
    #[error("invalid country code: {0}")]
    InvalidCountry(String),
}

impl Command {
    pub fn parse(data: &InteractionData) -> Result<Self, CommandError> {
        let options = &data.options;
        match data.name.as_str() {
            CREATE_MAP => Ok(Self::CreateMap),
            REMOVE_MAP => Ok(Self::RemoveMap),
            CLEAR_LOCATION => Ok(Self::ClearLocation),
            SET_LOCATION_COORDS => {
                let latitude = number_option(options, "latitude")?;
                let longitude = number_option(options, "longitude")?;
                Ok(Self::SetLocationCoords(Coordinate::new(latitude, longitude)?))
            }
            SET_LOCATION_ADDRESS => {
                let address = string_option(options, "address")?
                    .ok_or(CommandError::MissingOption("address"))?;
                if address.trim().is_empty() {
                    return Err(CommandError::MissingOption("address"));
                }
                let country = match string_option(options, "country")? {
                    Some(raw) => Some(
                        CountryCode::parse(&raw).ok_or(CommandError::InvalidCountry(raw))?,
                    ),
                    None => None,
                };
                Ok(Self::SetLocationAddress { address, country })
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }

    /// Whether the invoker needs channel-management permission.
    pub fn requires_manage_channels(&self) -> bool {
        matches!(self, Self::CreateMap | Self::RemoveMap)
    }
}

fn find<'a>(options: &'a [CommandOption], name: &str) -> Option<&'a serde_json::Value> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_ref())
}

fn number_option(options: &[CommandOption], name: &'static str) -> Result<f64, CommandError> {
    find(options, name)
        .ok_or(CommandError::MissingOption(name))?
        .as_f64()
        .ok_or(CommandError::InvalidOption(name))
}

fn string_option(
    options: &[CommandOption],
    name: &'static str,
) -> Result<Option<String>, CommandError> {
    match find(options, name) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or(CommandError::InvalidOption(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(name: &str, options: serde_json::Value) -> InteractionData {
        serde_json::from_value(serde_json::json!({ "name": name, "options": options })).unwrap()
    }

    #[test]
    fn parses_coords() {
        let cmd = Command::parse(&data(
            SET_LOCATION_COORDS,
            serde_json::json!([
                { "name": "latitude", "value": 40.0 },
                { "name": "longitude", "value": -75 }
            ]),
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::SetLocationCoords(Coordinate::new(40.0, -75.0).unwrap())
        );
    }

    #[test]
    fn rejects_out_of_range_coords() {
        let err = Command::parse(&data(
            SET_LOCATION_COORDS,
            serde_json::json!([
                { "name": "latitude", "value": 120.0 },
                { "name": "longitude", "value": 0.0 }
            ]),
        ))
        .unwrap_err();
        assert!(matches!(err, CommandError::InvalidCoordinate(_)));
    }

    #[test]
    fn parses_address_with_country() {
        let cmd = Command::parse(&data(
            SET_LOCATION_ADDRESS,
            serde_json::json!([
                { "name": "address", "value": "221B Baker Street" },
                { "name": "country", "value": "gb" }
            ]),
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::SetLocationAddress {
                address: "221B Baker Street".into(),
                country: CountryCode::parse("GB"),
            }
        );
    }

    #[test]
    fn rejects_bad_country_and_missing_address() {
        let err = Command::parse(&data(
            SET_LOCATION_ADDRESS,
            serde_json::json!([
                { "name": "address", "value": "Main St" },
                { "name": "country", "value": "England" }
            ]),
        ))
        .unwrap_err();
        assert_eq!(err, CommandError::InvalidCountry("England".into()));

        let err = Command::parse(&data(SET_LOCATION_ADDRESS, serde_json::json!([]))).unwrap_err();
        assert_eq!(err, CommandError::MissingOption("address"));
    }

    #[test]
    fn permission_gated_commands() {
        assert!(Command::CreateMap.requires_manage_channels());
        assert!(Command::RemoveMap.requires_manage_channels());
        assert!(!Command::ClearLocation.requires_manage_channels());

        let defs = definitions();
        assert_eq!(defs.len(), 5);
        let json = serde_json::to_value(&defs[0]).unwrap();
        assert_eq!(json["default_member_permissions"], "16");
        assert!(json.get("options").is_none());
    }
}
