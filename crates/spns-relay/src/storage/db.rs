//! SQLite database for the SPNS relay.

spns_core::define_database!(RelayDatabase, "Relay database migrations complete");
