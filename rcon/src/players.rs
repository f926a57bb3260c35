/// Administrative query whose reply lists the players currently online.
pub const SHOW_PLAYERS: &str = "ShowPlayers";

/// Extracts player names from a `ShowPlayers` reply.
///
/// The reply is CSV-like: a header row, then one row per player with the
/// display name in the first column. Blank rows, empty names and repeated
/// names are skipped. Output keeps the order of the rows.
pub fn parse_player_list(response: &str) -> Vec<String> {
    let rows: Vec<&str> = response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if rows.len() <= 1 {
        return Vec::new();
    }

    let mut players: Vec<String> = Vec::with_capacity(rows.len() - 1);
    for row in &rows[1..] {
        let name = row.split(',').next().unwrap_or_default().trim();
        if name.is_empty() || players.iter().any(|p| p == name) {
            continue;
        }
        players.push(name.to_string());
    }
    players
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_players() {
        let response = "name,playeruid,steamid\nAlice,uid1,steam1\nBob,uid2,steam2\n";
        assert_eq!(parse_player_list(response), vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_header_only() {
        assert!(parse_player_list("name,playeruid,steamid\n").is_empty());
    }

    #[test]
    fn test_header_with_spaces_and_blank_lines() {
        assert!(parse_player_list(" name,playeruid,steamid \n\n").is_empty());
    }

    #[test]
    fn test_empty_reply() {
        assert!(parse_player_list("").is_empty());
        assert!(parse_player_list("\n \n").is_empty());
    }

    #[test]
    fn test_skips_empty_player_name() {
        let response = "name,playeruid,steamid\n,uid1,steam1\nCharlie,uid2,steam2\n";
        assert_eq!(parse_player_list(response), vec!["Charlie"]);
    }

    #[test]
    fn test_skips_duplicate_names() {
        let response = "name,playeruid,steamid\nAlice,1,1\nBob,2,2\nAlice,3,3\n";
        assert_eq!(parse_player_list(response), vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_crlf_and_padding() {
        let response = "name,playeruid,steamid\r\n  Dave  ,uid,steam\r\nEve\r\n";
        assert_eq!(parse_player_list(response), vec!["Dave", "Eve"]);
    }

    #[test]
    fn test_never_longer_than_data_rows() {
        let response = "h\na,1\n,2\nb,3\n  \nc\n";
        let names = parse_player_list(response);
        assert!(names.len() <= 4);
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reparsing_rendered_output_is_stable() {
        let response = "name,playeruid,steamid\nAlice,uid1,steam1\nBob,uid2,steam2\n";
        let names = parse_player_list(response);

        let rendered = format!("name\n{}\n", names.join("\n"));
        assert_eq!(parse_player_list(&rendered), names);
    }
}
