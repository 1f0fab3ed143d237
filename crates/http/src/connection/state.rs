//! Connection states and the readiness a connection asks its event loop for.

/// Exclusive state tag of a connection, in progression order.
///
/// Optional detours: `ContinueSending` / `ContinueSent` for `Expect: 100-continue`,
/// `FootersReceiving` / `FootersReceived` for chunked requests, and one of the two body
/// sending loops depending on the response framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Waiting for the first byte of a request.
    Init,
    ReqLineReceiving,
    ReqLineReceived,
    ReqHeadersReceiving,
    HeadersReceived,
    /// Special headers applied, the application is called from here.
    HeadersProcessed,
    ContinueSending,
    ContinueSent,
    BodyReceiving,
    BodyReceived,
    FootersReceiving,
    FootersReceived,
    FullReqReceived,
    ReqRecvFinished,
    StartReply,
    HeadersSending,
    HeadersSent,
    UnchunkedBodyUnready,
    UnchunkedBodyReady,
    ChunkedBodyUnready,
    ChunkedBodyReady,
    ChunkedBodySent,
    FootersSending,
    FullReplySent,
    Closed,
}

impl State {
    /// States that wait for bytes from the client.
    pub fn is_receiving(self) -> bool {
        matches!(
            self,
            State::Init | State::ReqLineReceiving | State::ReqHeadersReceiving | State::BodyReceiving | State::FootersReceiving
        )
    }

    /// States that wait for the transport to accept bytes.
    pub fn is_sending(self) -> bool {
        matches!(
            self,
            State::ContinueSending
                | State::HeadersSending
                | State::UnchunkedBodyReady
                | State::ChunkedBodyReady
                | State::FootersSending
        )
    }

    /// `true` once a reply is being produced.
    pub(crate) fn is_replying(self) -> bool {
        matches!(
            self,
            State::StartReply
                | State::HeadersSending
                | State::HeadersSent
                | State::UnchunkedBodyUnready
                | State::UnchunkedBodyReady
                | State::ChunkedBodyUnready
                | State::ChunkedBodyReady
                | State::ChunkedBodySent
                | State::FootersSending
                | State::FullReplySent
        )
    }
}

/// What a connection waits for after an entry point returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventInterest {
    Read,
    Write,
    /// Nothing to do until resumed or until [`deadline`](crate::connection::Connection::deadline).
    Block,
    /// The connection is finished and can be dropped.
    Cleanup,
}

/// Whether the connection may serve another request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ConnReuse {
    #[default]
    MayReuse,
    MustClose,
    MustUpgrade,
}

/// Inputs of the event interest decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InterestInput {
    pub state: State,
    pub read_closed: bool,
    pub write_closed: bool,
    /// Suspended by the application or waiting for a content reader.
    pub blocked: bool,
    /// The read buffer can take more bytes.
    pub read_space: bool,
    /// The transport holds encoded bytes to write out first.
    pub transport_wants_write: bool,
}

/// The readiness truth table.
pub(crate) fn event_interest(input: InterestInput) -> EventInterest {
    let InterestInput { state, read_closed, write_closed, blocked, read_space, transport_wants_write } = input;
    if state == State::Closed || write_closed {
        return EventInterest::Cleanup;
    }
    if transport_wants_write {
        return EventInterest::Write;
    }
    if blocked {
        return EventInterest::Block;
    }
    if state.is_sending() {
        return EventInterest::Write;
    }
    if state.is_receiving() {
        return match (read_closed, read_space) {
            (true, _) => EventInterest::Cleanup,
            (false, true) => EventInterest::Read,
            // a full buffer is resolved by processing, not by reading
            (false, false) => EventInterest::Block,
        };
    }
    EventInterest::Block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(state: State) -> InterestInput {
        InterestInput {
            state,
            read_closed: false,
            write_closed: false,
            blocked: false,
            read_space: true,
            transport_wants_write: false,
        }
    }

    #[test]
    fn receiving_states_read() {
        for state in [State::Init, State::ReqLineReceiving, State::ReqHeadersReceiving, State::BodyReceiving, State::FootersReceiving] {
            assert_eq!(event_interest(input(state)), EventInterest::Read);
            assert_eq!(event_interest(InterestInput { read_closed: true, ..input(state) }), EventInterest::Cleanup);
            assert_eq!(event_interest(InterestInput { read_space: false, ..input(state) }), EventInterest::Block);
        }
    }

    #[test]
    fn sending_states_write() {
        for state in [
            State::ContinueSending,
            State::HeadersSending,
            State::UnchunkedBodyReady,
            State::ChunkedBodyReady,
            State::FootersSending,
        ] {
            assert_eq!(event_interest(input(state)), EventInterest::Write);
            // the peer closing its side does not stop a reply
            assert_eq!(event_interest(InterestInput { read_closed: true, ..input(state) }), EventInterest::Write);
            assert_eq!(event_interest(InterestInput { write_closed: true, ..input(state) }), EventInterest::Cleanup);
        }
    }

    #[test]
    fn blocked_and_closed() {
        assert_eq!(event_interest(InterestInput { blocked: true, ..input(State::HeadersProcessed) }), EventInterest::Block);
        assert_eq!(event_interest(InterestInput { blocked: true, ..input(State::UnchunkedBodyUnready) }), EventInterest::Block);
        assert_eq!(event_interest(input(State::Closed)), EventInterest::Cleanup);
        assert_eq!(
            event_interest(InterestInput { transport_wants_write: true, ..input(State::Init) }),
            EventInterest::Write
        );
    }

    #[test]
    fn state_classes_are_disjoint() {
        for state in [State::Init, State::HeadersSending, State::StartReply, State::Closed] {
            assert!(!(state.is_receiving() && state.is_sending()));
        }
        assert!(State::FullReplySent.is_replying());
        assert!(!State::BodyReceiving.is_replying());
    }
}
