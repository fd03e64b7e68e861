/*!
# IDAT DevKit - Stubs et utilitaires pour tests du publisher

Bibliothèque facilitant les tests du compteur simulé sans broker réel :
- Broker MQTT simulé (publications enregistrées, pannes injectables)
- Ticker borné pour exécuter exactement N cycles
- Harness avec assertions sur les topics publiés
*/

pub mod mqtt_stub;
pub mod test_utils;
pub mod ticker;

pub use mqtt_stub::{MockBroker, MockMessage};
pub use test_utils::{TestHarness, TestStats};
pub use ticker::BoundedTicker;
