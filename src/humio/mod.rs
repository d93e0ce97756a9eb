pub mod event;
pub mod sink;

pub use event::{DecodeError, DecodedEvent, Event, EventDecoder, StructuredEvent};
pub use sink::{DeliveryError, EventSink, HumioSink, IngestTarget};
