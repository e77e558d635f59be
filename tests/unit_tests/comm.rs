use meshworker::comm::{Communicator, SelfCommunicator, ThreadCommunicator};
use meshworker::error::CommunicationError;
use std::thread;
use std::time::Duration;

/// Runs `f` on one thread per rank and collects the results in rank order.
fn run_on_ranks<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(ThreadCommunicator) -> R + Sync,
{
    let f = &f;
    thread::scope(|scope| {
        let handles: Vec<_> = ThreadCommunicator::create(size)
            .into_iter()
            .map(|comm| scope.spawn(move || f(comm)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("Rank panicked"))
            .collect()
    })
}

#[test]
fn self_communicator_returns_own_messages() {
    let comm = SelfCommunicator;
    assert_eq!(comm.rank(), 0);
    assert_eq!(comm.size(), 1);
    assert_eq!(comm.exchange(vec![vec![1, 2, 3]]).unwrap(), vec![vec![1, 2, 3]]);
    assert!(comm.all_agree(true).unwrap());
    assert!(!comm.all_agree(false).unwrap());
    assert_eq!(
        comm.exchange(vec![vec![1], vec![2]]).unwrap_err(),
        CommunicationError::BufferCount { expected: 1, actual: 2 }
    );
}

#[test]
fn personalized_exchange() {
    let results = run_on_ranks(3, |comm| {
        let rank = comm.rank();
        assert_eq!(comm.size(), 3);
        let outgoing = (0..3).map(|dest| vec![(rank, dest); rank + 1]).collect();
        comm.exchange(outgoing).unwrap()
    });

    for (rank, incoming) in results.into_iter().enumerate() {
        assert_eq!(incoming.len(), 3);
        for (source, messages) in incoming.into_iter().enumerate() {
            assert_eq!(messages, vec![(source, rank); source + 1]);
        }
    }
}

#[test]
fn consecutive_rounds_are_not_mixed_up() {
    let results = run_on_ranks(4, |comm| {
        let mut sums = Vec::new();
        for round in 0..20usize {
            // Uneven work lets fast ranks run ahead into the next round
            if comm.rank() == round % 4 {
                thread::sleep(Duration::from_millis(1));
            }
            let outgoing = (0..comm.size()).map(|_| vec![round * 10 + comm.rank()]).collect();
            let incoming = comm.exchange(outgoing).unwrap();
            sums.push(incoming.into_iter().flatten().sum::<usize>());
        }
        sums
    });

    let expected: Vec<_> = (0..20).map(|round| 4 * round * 10 + 6).collect();
    for sums in results {
        assert_eq!(sums, expected);
    }
}

#[test]
fn rounds_with_different_payload_types() {
    let results = run_on_ranks(2, |comm| {
        let numbers = comm.exchange(vec![vec![comm.rank() as u32]; 2]).unwrap();
        let strings = comm.exchange(vec![vec![format!("rank {}", comm.rank())]; 2]).unwrap();
        (numbers, strings)
    });
    for (numbers, strings) in results {
        assert_eq!(numbers, vec![vec![0], vec![1]]);
        assert_eq!(strings, vec![vec!["rank 0".to_string()], vec!["rank 1".to_string()]]);
    }
}

#[test]
fn all_agree_requires_every_rank() {
    let results = run_on_ranks(3, |comm| comm.all_agree(comm.rank() != 1).unwrap());
    assert_eq!(results, vec![false, false, false]);

    let results = run_on_ranks(3, |comm| comm.all_agree(true).unwrap());
    assert_eq!(results, vec![true, true, true]);
}

#[test]
fn mismatched_payload_types_are_detected() {
    let results = run_on_ranks(2, |comm| {
        if comm.rank() == 0 {
            comm.exchange(vec![vec![1u32]; 2]).map(|_| ())
        } else {
            comm.exchange(vec![vec![1.0f64]; 2]).map(|_| ())
        }
    });
    assert_eq!(results[0], Err(CommunicationError::PayloadType { peer: 1, round: 0 }));
    assert_eq!(results[1], Err(CommunicationError::PayloadType { peer: 0, round: 0 }));
}

#[test]
fn missing_peer_times_out() {
    let mut comms = ThreadCommunicator::create(2);
    let idle = comms.pop().unwrap();
    let comm = comms.pop().unwrap().with_timeout(Duration::from_millis(50));

    let err = comm.exchange(vec![vec![1], vec![2]]).unwrap_err();
    assert_eq!(
        err,
        CommunicationError::Timeout {
            peer: 1,
            round: 0,
            timeout: Duration::from_millis(50)
        }
    );
    drop(idle);
}

#[test]
fn dropped_peer_disconnects() {
    let mut comms = ThreadCommunicator::create(2);
    drop(comms.pop());
    let comm = comms.pop().unwrap();
    assert_eq!(
        comm.exchange(vec![vec![1], vec![2]]).unwrap_err(),
        CommunicationError::Disconnected { peer: 1, round: 0 }
    );
}

#[test]
fn wrong_number_of_buffers() {
    let comms = ThreadCommunicator::create(3);
    assert_eq!(
        comms[0].exchange(vec![vec![1]]).unwrap_err(),
        CommunicationError::BufferCount { expected: 3, actual: 1 }
    );
}
