//! Dispatcher and consumer-loop scenarios against an in-memory stream.
