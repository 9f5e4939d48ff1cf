use ulid::Ulid;

use crate::limits::GAME_DURATION_MINUTES;
use crate::model::*;

/// Present participants in queue order: earliest `joined_at` first, id breaks ties.
pub fn ordered_present(session: &QueueSession) -> Vec<&QueueParticipant> {
    let mut present: Vec<&QueueParticipant> = session.present().collect();
    present.sort_by_key(|p| (p.joined_at, p.id));
    present
}

/// 1-based position of the user's present participant row.
pub fn position_of(session: &QueueSession, user_id: Ulid) -> Option<u32> {
    let me = session.present_participant(user_id)?;
    let ahead = session
        .present()
        .filter(|q| (q.joined_at, q.id) < (me.joined_at, me.id))
        .count() as u32;
    Some(ahead + 1)
}

pub fn estimated_wait_minutes(position: u32) -> u32 {
    position * GAME_DURATION_MINUTES
}

/// Wait for a user: their own position if present, otherwise the back of the line.
pub fn wait_for(session: &QueueSession, user_id: Option<Ulid>) -> (Option<u32>, u32) {
    let position = user_id.and_then(|u| position_of(session, u));
    let wait = match position {
        Some(p) => estimated_wait_minutes(p),
        None => estimated_wait_minutes(session.current_players() + 1),
    };
    (position, wait)
}

pub fn standings(session: &QueueSession, viewer: Option<Ulid>) -> QueueStandings {
    let standings = ordered_present(session)
        .into_iter()
        .zip(1u32..)
        .map(|(p, position)| QueueStanding {
            participant_id: p.id,
            user_id: p.user_id,
            position,
            joined_at: p.joined_at,
            status: p.status,
            games_played: p.games_played,
            estimated_wait_minutes: estimated_wait_minutes(position),
        })
        .collect();
    let (position, estimated_wait_minutes) = wait_for(session, viewer);
    QueueStandings {
        session_id: session.id,
        status: session.status,
        current_players: session.current_players(),
        max_players: session.max_players,
        standings,
        position,
        estimated_wait_minutes,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn session() -> QueueSession {
        QueueSession {
            id: Ulid::new(),
            court_id: Ulid::new(),
            organizer_id: Ulid::new(),
            span: Span::new(0, HOUR_MS),
            status: SessionStatus::Open,
            max_players: 8,
            cost_per_game: Decimal::new(150, 0),
            participants: Vec::new(),
            created_at: 0,
        }
    }

    fn join(s: &mut QueueSession, user: Ulid, at: Ms) {
        s.participants.push(QueueParticipant {
            id: Ulid::new(),
            session_id: s.id,
            user_id: user,
            joined_at: at,
            left_at: None,
            status: ParticipantStatus::Waiting,
            games_played: 0,
            games_won: 0,
            amount_owed: Decimal::ZERO,
            payment_status: ParticipantPaymentStatus::Unpaid,
        });
    }

    #[test]
    fn positions_follow_join_order() {
        let mut s = session();
        let (a, b, c) = (Ulid::new(), Ulid::new(), Ulid::new());
        join(&mut s, b, 20);
        join(&mut s, a, 10);
        join(&mut s, c, 30);
        assert_eq!(position_of(&s, a), Some(1));
        assert_eq!(position_of(&s, b), Some(2));
        assert_eq!(position_of(&s, c), Some(3));
        assert_eq!(position_of(&s, Ulid::new()), None);
    }

    #[test]
    fn departure_closes_the_gap() {
        let mut s = session();
        let (a, b, c) = (Ulid::new(), Ulid::new(), Ulid::new());
        join(&mut s, a, 10);
        join(&mut s, b, 20);
        join(&mut s, c, 30);
        s.present_participant_mut(b).unwrap().left_at = Some(40);

        assert_eq!(position_of(&s, a), Some(1));
        assert_eq!(position_of(&s, c), Some(2));
        let ranks: Vec<u32> = standings(&s, None).standings.iter().map(|x| x.position).collect();
        assert_eq!(ranks, vec![1, 2]);
    }

    #[test]
    fn same_instant_join_is_still_a_strict_order() {
        let mut s = session();
        let (a, b) = (Ulid::new(), Ulid::new());
        join(&mut s, a, 10);
        join(&mut s, b, 10);
        let mut positions = vec![position_of(&s, a).unwrap(), position_of(&s, b).unwrap()];
        positions.sort();
        assert_eq!(positions, vec![1, 2]);
    }

    #[test]
    fn wait_estimates() {
        let mut s = session();
        let (a, b) = (Ulid::new(), Ulid::new());
        join(&mut s, a, 10);
        join(&mut s, b, 20);
        assert_eq!(wait_for(&s, Some(b)), (Some(2), 30));
        // Outsider goes to the back of a two-person line.
        assert_eq!(wait_for(&s, Some(Ulid::new())), (None, 45));
        assert_eq!(wait_for(&s, None), (None, 45));
    }
}
