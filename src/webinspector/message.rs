// Jackson Coxson
//! The Web Inspector typed message model (C10 schema half): a tagged
//! union over the twelve `_rpc_*:` selectors, each declaring the subset
//! of `WIR*` keys it carries, plus the plist encode/decode that turns a
//! variant into (and back out of) the `{ "__selector", "__argument" }`
//! wire dictionary.
//!
//! Reimplemented per spec.md's REDESIGN FLAGS note: one tagged variant
//! per selector rather than a mutable "dict of optional fields" base
//! class. Unknown/undeclared fields are a decode error
//! ([`InspectorError::UndefinedProperty`]), never a silent default.

use std::collections::BTreeMap;

use crate::error::InspectorError;

/// Canonical wire-string key registry (§Glossary). `WIRURLKey` is the one
/// key whose wire form is not the UpperCamel of its variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageKey {
    ApplicationBundleIdentifier,
    ApplicationDictionary,
    ApplicationIdentifier,
    ApplicationName,
    AutomaticallyPause,
    ConnectionIdentifier,
    Destination,
    DriverDictionary,
    HostApplicationIdentifier,
    IsApplicationActive,
    IsApplicationProxy,
    IsApplicationReady,
    Listing,
    MessageData,
    PageIdentifier,
    RemoteAutomationEnabled,
    Sender,
    SimulatorBuild,
    SimulatorName,
    SimulatorProductVersion,
    SocketData,
    Title,
    Type,
    Url,
}

impl MessageKey {
    pub fn wire(self) -> &'static str {
        match self {
            MessageKey::ApplicationBundleIdentifier => "WIRApplicationBundleIdentifierKey",
            MessageKey::ApplicationDictionary => "WIRApplicationDictionaryKey",
            MessageKey::ApplicationIdentifier => "WIRApplicationIdentifierKey",
            MessageKey::ApplicationName => "WIRApplicationNameKey",
            MessageKey::AutomaticallyPause => "WIRAutomaticallyPause",
            MessageKey::ConnectionIdentifier => "WIRConnectionIdentifierKey",
            MessageKey::Destination => "WIRDestinationKey",
            MessageKey::DriverDictionary => "WIRDriverDictionaryKey",
            MessageKey::HostApplicationIdentifier => "WIRHostApplicationIdentifierKey",
            MessageKey::IsApplicationActive => "WIRIsApplicationActiveKey",
            MessageKey::IsApplicationProxy => "WIRIsApplicationProxyKey",
            MessageKey::IsApplicationReady => "WIRIsApplicationReadyKey",
            MessageKey::Listing => "WIRListingKey",
            MessageKey::MessageData => "WIRMessageDataKey",
            MessageKey::PageIdentifier => "WIRPageIdentifierKey",
            MessageKey::RemoteAutomationEnabled => "WIRRemoteAutomationEnabledKey",
            MessageKey::Sender => "WIRSenderKey",
            MessageKey::SimulatorBuild => "WIRSimulatorBuildKey",
            MessageKey::SimulatorName => "WIRSimulatorNameKey",
            MessageKey::SimulatorProductVersion => "WIRSimulatorProductVersionKey",
            MessageKey::SocketData => "WIRSocketDataKey",
            MessageKey::Title => "WIRTitleKey",
            MessageKey::Type => "WIRTypeKey",
            MessageKey::Url => "WIRURLKey",
        }
    }

    pub fn for_string(s: &str) -> Option<Self> {
        Some(match s {
            "WIRApplicationBundleIdentifierKey" => MessageKey::ApplicationBundleIdentifier,
            "WIRApplicationDictionaryKey" => MessageKey::ApplicationDictionary,
            "WIRApplicationIdentifierKey" => MessageKey::ApplicationIdentifier,
            "WIRApplicationNameKey" => MessageKey::ApplicationName,
            "WIRAutomaticallyPause" => MessageKey::AutomaticallyPause,
            "WIRConnectionIdentifierKey" => MessageKey::ConnectionIdentifier,
            "WIRDestinationKey" => MessageKey::Destination,
            "WIRDriverDictionaryKey" => MessageKey::DriverDictionary,
            "WIRHostApplicationIdentifierKey" => MessageKey::HostApplicationIdentifier,
            "WIRIsApplicationActiveKey" => MessageKey::IsApplicationActive,
            "WIRIsApplicationProxyKey" => MessageKey::IsApplicationProxy,
            "WIRIsApplicationReadyKey" => MessageKey::IsApplicationReady,
            "WIRListingKey" => MessageKey::Listing,
            "WIRMessageDataKey" => MessageKey::MessageData,
            "WIRPageIdentifierKey" => MessageKey::PageIdentifier,
            "WIRRemoteAutomationEnabledKey" => MessageKey::RemoteAutomationEnabled,
            "WIRSenderKey" => MessageKey::Sender,
            "WIRSimulatorBuildKey" => MessageKey::SimulatorBuild,
            "WIRSimulatorNameKey" => MessageKey::SimulatorName,
            "WIRSimulatorProductVersionKey" => MessageKey::SimulatorProductVersion,
            "WIRSocketDataKey" => MessageKey::SocketData,
            "WIRTitleKey" => MessageKey::Title,
            "WIRTypeKey" => MessageKey::Type,
            "WIRURLKey" => MessageKey::Url,
            _ => return None,
        })
    }
}

/// A page or application or driver listing entry, keyed by its
/// identifier on the wire (page number, application id, driver id).
pub type NestedListing = BTreeMap<String, plist::Dictionary>;

fn nested_to_plist(listing: &NestedListing) -> plist::Dictionary {
    let mut out = plist::Dictionary::new();
    for (id, fields) in listing {
        out.insert(id.clone(), plist::Value::Dictionary(fields.clone()));
    }
    out
}

fn nested_from_plist(dict: &plist::Dictionary) -> NestedListing {
    dict.iter()
        .filter_map(|(k, v)| v.as_dictionary().map(|d| (k.clone(), d.clone())))
        .collect()
}

fn get_string(arg: &plist::Dictionary, key: MessageKey) -> Result<String, InspectorError> {
    arg.get(key.wire())
        .and_then(|v| v.as_string())
        .map(str::to_owned)
        .ok_or(InspectorError::UndefinedProperty(key.wire(), "string"))
}

fn get_int_bool(arg: &plist::Dictionary, key: MessageKey) -> Result<bool, InspectorError> {
    arg.get(key.wire())
        .and_then(|v| v.as_signed_integer())
        .map(|n| n != 0)
        .ok_or(InspectorError::UndefinedProperty(key.wire(), "int-bool"))
}

fn get_bool(arg: &plist::Dictionary, key: MessageKey) -> Result<bool, InspectorError> {
    arg.get(key.wire())
        .and_then(|v| v.as_boolean())
        .ok_or(InspectorError::UndefinedProperty(key.wire(), "bool"))
}

fn get_bytes(arg: &plist::Dictionary, key: MessageKey) -> Result<Vec<u8>, InspectorError> {
    arg.get(key.wire())
        .and_then(|v| v.as_data())
        .map(|d| d.to_vec())
        .ok_or(InspectorError::UndefinedProperty(key.wire(), "data"))
}

fn get_nested(arg: &plist::Dictionary, key: MessageKey) -> Result<NestedListing, InspectorError> {
    arg.get(key.wire())
        .and_then(|v| v.as_dictionary())
        .map(nested_from_plist)
        .ok_or(InspectorError::UndefinedProperty(key.wire(), "dictionary"))
}

macro_rules! put_string {
    ($arg:expr, $key:expr, $val:expr) => {
        $arg.insert($key.wire().to_string(), plist::Value::String($val.clone()))
    };
}

macro_rules! put_int_bool {
    ($arg:expr, $key:expr, $val:expr) => {
        $arg.insert($key.wire().to_string(), plist::Value::Integer((*$val as i64).into()))
    };
}

macro_rules! put_bool {
    ($arg:expr, $key:expr, $val:expr) => {
        $arg.insert($key.wire().to_string(), plist::Value::Boolean(*$val))
    };
}

macro_rules! put_bytes {
    ($arg:expr, $key:expr, $val:expr) => {
        $arg.insert($key.wire().to_string(), plist::Value::Data($val.clone()))
    };
}

macro_rules! put_nested {
    ($arg:expr, $key:expr, $val:expr) => {
        $arg.insert($key.wire().to_string(), plist::Value::Dictionary(nested_to_plist($val)))
    };
}

/// One inspector message per `_rpc_*:` selector, carrying exactly the
/// fields that selector declares.
#[derive(Debug, Clone, PartialEq)]
pub enum InspectorMessage {
    ApplicationConnected {
        application_identifier: String,
        application_name: String,
        is_application_proxy: bool,
        host_application_identifier: String,
    },
    ApplicationDisconnected {
        application_identifier: String,
    },
    ApplicationSentData {
        connection_identifier: String,
        application_identifier: String,
        message_data: Vec<u8>,
    },
    ApplicationSentListing {
        connection_identifier: String,
        application_identifier: String,
        listing: NestedListing,
    },
    ApplicationUpdated {
        application_identifier: String,
        is_application_proxy: bool,
        is_application_active: bool,
        is_application_ready: bool,
        host_application_identifier: String,
    },
    ForwardGetListing {
        connection_identifier: String,
        application_identifier: String,
    },
    ForwardSocketData {
        connection_identifier: String,
        application_identifier: String,
        page_identifier: String,
        sender: String,
        socket_data: Vec<u8>,
    },
    ForwardSocketSetup {
        connection_identifier: String,
        application_identifier: String,
        page_identifier: String,
        sender: String,
        destination: String,
        automatically_pause: bool,
    },
    ReportConnectedApplicationList {
        application_dictionary: NestedListing,
    },
    ReportConnectedDriverList {
        driver_dictionary: NestedListing,
    },
    ReportIdentifier {
        connection_identifier: String,
    },
    ReportSetup {
        simulator_name: String,
        simulator_build: String,
        simulator_product_version: String,
        remote_automation_enabled: bool,
    },
}

impl InspectorMessage {
    pub fn selector(&self) -> &'static str {
        match self {
            InspectorMessage::ApplicationConnected { .. } => "_rpc_applicationConnected:",
            InspectorMessage::ApplicationDisconnected { .. } => "_rpc_applicationDisconnected:",
            InspectorMessage::ApplicationSentData { .. } => "_rpc_applicationSentData:",
            InspectorMessage::ApplicationSentListing { .. } => "_rpc_applicationSentListing:",
            InspectorMessage::ApplicationUpdated { .. } => "_rpc_applicationUpdated:",
            InspectorMessage::ForwardGetListing { .. } => "_rpc_forwardGetListing:",
            InspectorMessage::ForwardSocketData { .. } => "_rpc_forwardSocketData:",
            InspectorMessage::ForwardSocketSetup { .. } => "_rpc_forwardSocketSetup:",
            InspectorMessage::ReportConnectedApplicationList { .. } => "_rpc_reportConnectedApplicationList:",
            InspectorMessage::ReportConnectedDriverList { .. } => "_rpc_reportConnectedDriverList:",
            InspectorMessage::ReportIdentifier { .. } => "_rpc_reportIdentifier:",
            InspectorMessage::ReportSetup { .. } => "_rpc_reportSetup:",
        }
    }

    fn argument(&self) -> plist::Dictionary {
        let mut arg = plist::Dictionary::new();
        match self {
            InspectorMessage::ApplicationConnected {
                application_identifier,
                application_name,
                is_application_proxy,
                host_application_identifier,
            } => {
                put_string!(arg, MessageKey::ApplicationIdentifier, application_identifier);
                put_string!(arg, MessageKey::ApplicationName, application_name);
                put_bool!(arg, MessageKey::IsApplicationProxy, is_application_proxy);
                put_string!(arg, MessageKey::HostApplicationIdentifier, host_application_identifier);
            }
            InspectorMessage::ApplicationDisconnected { application_identifier } => {
                put_string!(arg, MessageKey::ApplicationIdentifier, application_identifier);
            }
            InspectorMessage::ApplicationSentData {
                connection_identifier,
                application_identifier,
                message_data,
            } => {
                put_string!(arg, MessageKey::ConnectionIdentifier, connection_identifier);
                put_string!(arg, MessageKey::ApplicationIdentifier, application_identifier);
                put_bytes!(arg, MessageKey::MessageData, message_data);
            }
            InspectorMessage::ApplicationSentListing {
                connection_identifier,
                application_identifier,
                listing,
            } => {
                put_string!(arg, MessageKey::ConnectionIdentifier, connection_identifier);
                put_string!(arg, MessageKey::ApplicationIdentifier, application_identifier);
                put_nested!(arg, MessageKey::Listing, listing);
            }
            InspectorMessage::ApplicationUpdated {
                application_identifier,
                is_application_proxy,
                is_application_active,
                is_application_ready,
                host_application_identifier,
            } => {
                put_string!(arg, MessageKey::ApplicationIdentifier, application_identifier);
                put_bool!(arg, MessageKey::IsApplicationProxy, is_application_proxy);
                put_int_bool!(arg, MessageKey::IsApplicationActive, is_application_active);
                put_bool!(arg, MessageKey::IsApplicationReady, is_application_ready);
                put_string!(arg, MessageKey::HostApplicationIdentifier, host_application_identifier);
            }
            InspectorMessage::ForwardGetListing {
                connection_identifier,
                application_identifier,
            } => {
                put_string!(arg, MessageKey::ConnectionIdentifier, connection_identifier);
                put_string!(arg, MessageKey::ApplicationIdentifier, application_identifier);
            }
            InspectorMessage::ForwardSocketData {
                connection_identifier,
                application_identifier,
                page_identifier,
                sender,
                socket_data,
            } => {
                put_string!(arg, MessageKey::ConnectionIdentifier, connection_identifier);
                put_string!(arg, MessageKey::ApplicationIdentifier, application_identifier);
                put_string!(arg, MessageKey::PageIdentifier, page_identifier);
                put_string!(arg, MessageKey::Sender, sender);
                put_bytes!(arg, MessageKey::SocketData, socket_data);
            }
            InspectorMessage::ForwardSocketSetup {
                connection_identifier,
                application_identifier,
                page_identifier,
                sender,
                destination,
                automatically_pause,
            } => {
                put_string!(arg, MessageKey::ConnectionIdentifier, connection_identifier);
                put_string!(arg, MessageKey::ApplicationIdentifier, application_identifier);
                put_string!(arg, MessageKey::PageIdentifier, page_identifier);
                put_string!(arg, MessageKey::Sender, sender);
                put_string!(arg, MessageKey::Destination, destination);
                put_bool!(arg, MessageKey::AutomaticallyPause, automatically_pause);
            }
            InspectorMessage::ReportConnectedApplicationList { application_dictionary } => {
                put_nested!(arg, MessageKey::ApplicationDictionary, application_dictionary);
            }
            InspectorMessage::ReportConnectedDriverList { driver_dictionary } => {
                put_nested!(arg, MessageKey::DriverDictionary, driver_dictionary);
            }
            InspectorMessage::ReportIdentifier { connection_identifier } => {
                put_string!(arg, MessageKey::ConnectionIdentifier, connection_identifier);
            }
            InspectorMessage::ReportSetup {
                simulator_name,
                simulator_build,
                simulator_product_version,
                remote_automation_enabled,
            } => {
                put_string!(arg, MessageKey::SimulatorName, simulator_name);
                put_string!(arg, MessageKey::SimulatorBuild, simulator_build);
                put_string!(arg, MessageKey::SimulatorProductVersion, simulator_product_version);
                put_bool!(arg, MessageKey::RemoteAutomationEnabled, remote_automation_enabled);
            }
        }
        arg
    }

    /// Encodes this message as the `{ "__selector", "__argument" }` wire
    /// dictionary (still needs `plist::to_writer_xml`/binary writer to
    /// become bytes; see [`crate::webinspector::client`]).
    pub fn to_plist(&self) -> plist::Value {
        let mut root = plist::Dictionary::new();
        root.insert("__selector".to_string(), plist::Value::String(self.selector().to_string()));
        root.insert("__argument".to_string(), plist::Value::Dictionary(self.argument()));
        plist::Value::Dictionary(root)
    }

    /// Reconstructs the typed variant for `selector` out of `argument`,
    /// the selector→builder registry of spec.md §4.10.
    pub fn from_selector_and_argument(selector: &str, argument: &plist::Dictionary) -> Result<Self, InspectorError> {
        Ok(match selector {
            "_rpc_applicationConnected:" => InspectorMessage::ApplicationConnected {
                application_identifier: get_string(argument, MessageKey::ApplicationIdentifier)?,
                application_name: get_string(argument, MessageKey::ApplicationName)?,
                is_application_proxy: get_bool(argument, MessageKey::IsApplicationProxy)?,
                host_application_identifier: get_string(argument, MessageKey::HostApplicationIdentifier)?,
            },
            "_rpc_applicationDisconnected:" => InspectorMessage::ApplicationDisconnected {
                application_identifier: get_string(argument, MessageKey::ApplicationIdentifier)?,
            },
            "_rpc_applicationSentData:" => InspectorMessage::ApplicationSentData {
                connection_identifier: get_string(argument, MessageKey::ConnectionIdentifier)?,
                application_identifier: get_string(argument, MessageKey::ApplicationIdentifier)?,
                message_data: get_bytes(argument, MessageKey::MessageData)?,
            },
            "_rpc_applicationSentListing:" => InspectorMessage::ApplicationSentListing {
                connection_identifier: get_string(argument, MessageKey::ConnectionIdentifier)?,
                application_identifier: get_string(argument, MessageKey::ApplicationIdentifier)?,
                listing: get_nested(argument, MessageKey::Listing)?,
            },
            "_rpc_applicationUpdated:" => InspectorMessage::ApplicationUpdated {
                application_identifier: get_string(argument, MessageKey::ApplicationIdentifier)?,
                is_application_proxy: get_bool(argument, MessageKey::IsApplicationProxy)?,
                is_application_active: get_int_bool(argument, MessageKey::IsApplicationActive)?,
                is_application_ready: get_bool(argument, MessageKey::IsApplicationReady)?,
                host_application_identifier: get_string(argument, MessageKey::HostApplicationIdentifier)?,
            },
            "_rpc_forwardGetListing:" => InspectorMessage::ForwardGetListing {
                connection_identifier: get_string(argument, MessageKey::ConnectionIdentifier)?,
                application_identifier: get_string(argument, MessageKey::ApplicationIdentifier)?,
            },
            "_rpc_forwardSocketData:" => InspectorMessage::ForwardSocketData {
                connection_identifier: get_string(argument, MessageKey::ConnectionIdentifier)?,
                application_identifier: get_string(argument, MessageKey::ApplicationIdentifier)?,
                page_identifier: get_string(argument, MessageKey::PageIdentifier)?,
                sender: get_string(argument, MessageKey::Sender)?,
                socket_data: get_bytes(argument, MessageKey::SocketData)?,
            },
            "_rpc_forwardSocketSetup:" => InspectorMessage::ForwardSocketSetup {
                connection_identifier: get_string(argument, MessageKey::ConnectionIdentifier)?,
                application_identifier: get_string(argument, MessageKey::ApplicationIdentifier)?,
                page_identifier: get_string(argument, MessageKey::PageIdentifier)?,
                sender: get_string(argument, MessageKey::Sender)?,
                destination: get_string(argument, MessageKey::Destination)?,
                automatically_pause: get_bool(argument, MessageKey::AutomaticallyPause)?,
            },
            "_rpc_reportConnectedApplicationList:" => InspectorMessage::ReportConnectedApplicationList {
                application_dictionary: get_nested(argument, MessageKey::ApplicationDictionary)?,
            },
            "_rpc_reportConnectedDriverList:" => InspectorMessage::ReportConnectedDriverList {
                driver_dictionary: get_nested(argument, MessageKey::DriverDictionary)?,
            },
            "_rpc_reportIdentifier:" => InspectorMessage::ReportIdentifier {
                connection_identifier: get_string(argument, MessageKey::ConnectionIdentifier)?,
            },
            "_rpc_reportSetup:" => InspectorMessage::ReportSetup {
                simulator_name: get_string(argument, MessageKey::SimulatorName)?,
                simulator_build: get_string(argument, MessageKey::SimulatorBuild)?,
                simulator_product_version: get_string(argument, MessageKey::SimulatorProductVersion)?,
                remote_automation_enabled: get_bool(argument, MessageKey::RemoteAutomationEnabled)?,
            },
            other => return Err(InspectorError::UnknownSelector(other.to_string())),
        })
    }

    /// Parses a full wire dictionary (`__selector` + `__argument`).
    pub fn from_plist(value: &plist::Value) -> Result<Self, InspectorError> {
        let root = value
            .as_dictionary()
            .ok_or_else(|| InspectorError::UnknownSelector("<non-dictionary root>".to_string()))?;
        let selector = root
            .get("__selector")
            .and_then(|v| v.as_string())
            .ok_or_else(|| InspectorError::UnknownSelector("<missing __selector>".to_string()))?;
        let empty = plist::Dictionary::new();
        let argument = root.get("__argument").and_then(|v| v.as_dictionary()).unwrap_or(&empty);
        Self::from_selector_and_argument(selector, argument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_message_key_round_trips_through_its_wire_string() {
        let keys = [
            MessageKey::ApplicationBundleIdentifier,
            MessageKey::ApplicationDictionary,
            MessageKey::ApplicationIdentifier,
            MessageKey::ApplicationName,
            MessageKey::AutomaticallyPause,
            MessageKey::ConnectionIdentifier,
            MessageKey::Destination,
            MessageKey::DriverDictionary,
            MessageKey::HostApplicationIdentifier,
            MessageKey::IsApplicationActive,
            MessageKey::IsApplicationProxy,
            MessageKey::IsApplicationReady,
            MessageKey::Listing,
            MessageKey::MessageData,
            MessageKey::PageIdentifier,
            MessageKey::RemoteAutomationEnabled,
            MessageKey::Sender,
            MessageKey::SimulatorBuild,
            MessageKey::SimulatorName,
            MessageKey::SimulatorProductVersion,
            MessageKey::SocketData,
            MessageKey::Title,
            MessageKey::Type,
            MessageKey::Url,
        ];
        for key in keys {
            assert_eq!(MessageKey::for_string(key.wire()).unwrap(), key);
        }
    }

    #[test]
    fn wir_url_key_is_the_documented_irregular_wire_name() {
        assert_eq!(MessageKey::Url.wire(), "WIRURLKey");
    }

    #[test]
    fn report_identifier_round_trips_through_plist() {
        let msg = InspectorMessage::ReportIdentifier {
            connection_identifier: "id1".to_string(),
        };
        let plist = msg.to_plist();
        let decoded = InspectorMessage::from_plist(&plist).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn report_identifier_wire_shape_matches_the_spec_example() {
        let msg = InspectorMessage::ReportIdentifier {
            connection_identifier: "id1".to_string(),
        };
        let plist = msg.to_plist();
        let root = plist.as_dictionary().unwrap();
        assert_eq!(root.get("__selector").unwrap().as_string().unwrap(), "_rpc_reportIdentifier:");
        let arg = root.get("__argument").unwrap().as_dictionary().unwrap();
        assert_eq!(arg.get("WIRConnectionIdentifierKey").unwrap().as_string().unwrap(), "id1");
        assert_eq!(arg.len(), 1);
    }

    #[test]
    fn is_application_active_is_encoded_as_an_integer_not_a_boolean() {
        let msg = InspectorMessage::ApplicationUpdated {
            application_identifier: "app1".to_string(),
            is_application_proxy: false,
            is_application_active: true,
            is_application_ready: true,
            host_application_identifier: "host1".to_string(),
        };
        let plist = msg.to_plist();
        let root = plist.as_dictionary().unwrap();
        let arg = root.get("__argument").unwrap().as_dictionary().unwrap();
        assert!(arg.get("WIRIsApplicationActiveKey").unwrap().as_signed_integer().is_some());
        assert!(arg.get("WIRIsApplicationReadyKey").unwrap().as_boolean().is_some());
    }

    #[test]
    fn undeclared_field_is_a_decode_error_not_a_default() {
        let mut arg = plist::Dictionary::new();
        arg.insert("WIRApplicationIdentifierKey".to_string(), plist::Value::String("x".to_string()));
        let err = InspectorMessage::from_selector_and_argument("_rpc_applicationDisconnected:", &plist::Dictionary::new()).unwrap_err();
        assert!(matches!(err, InspectorError::UndefinedProperty(..)));
        // sanity: the variant that *does* declare the field still decodes fine
        InspectorMessage::from_selector_and_argument("_rpc_applicationDisconnected:", &arg).unwrap();
    }

    #[test]
    fn unknown_selector_is_rejected() {
        let err = InspectorMessage::from_selector_and_argument("_rpc_totallyMadeUp:", &plist::Dictionary::new()).unwrap_err();
        assert!(matches!(err, InspectorError::UnknownSelector(_)));
    }

    #[test]
    fn nested_listing_round_trips() {
        let mut page = plist::Dictionary::new();
        page.insert("WIRTitleKey".to_string(), plist::Value::String("Example".to_string()));
        page.insert("WIRURLKey".to_string(), plist::Value::String("https://example.com".to_string()));
        let mut listing = NestedListing::new();
        listing.insert("1".to_string(), page);

        let msg = InspectorMessage::ApplicationSentListing {
            connection_identifier: "id1".to_string(),
            application_identifier: "app1".to_string(),
            listing,
        };
        let decoded = InspectorMessage::from_plist(&msg.to_plist()).unwrap();
        assert_eq!(msg, decoded);
    }
}
