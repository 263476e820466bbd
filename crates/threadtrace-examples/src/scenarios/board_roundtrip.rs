use std::path::Path;

pub const DEFAULT_PATH: &str = "currentBoardState";

const BACK_RANK: [&str; 8] = ["R", "T", "B", "Q", "K", "B", "T", "R"];
const EMPTY: &str = "e";

pub type Board = Vec<Vec<String>>;

/// The starting layout, black on row 0. Pieces are a colour prefix (`b`/`w`)
/// plus a kind letter; `e` marks an empty square.
pub fn initial_board() -> Board {
    let rank = |colour: &str| -> Vec<String> {
        BACK_RANK.iter().map(|kind| format!("{colour}{kind}")).collect()
    };
    let pawns = |colour: &str| vec![format!("{colour}P"); 8];
    let empty = || vec![EMPTY.to_string(); 8];

    let mut board = Vec::with_capacity(8);
    board.push(rank("b"));
    board.push(pawns("b"));
    for _ in 0..4 {
        board.push(empty());
    }
    board.push(pawns("w"));
    board.push(rank("w"));
    board
}

pub fn write_board(path: &Path, board: &Board) -> Result<(), String> {
    let json = facet_json::to_string(board).map_err(|e| format!("encode board: {e}"))?;
    std::fs::write(path, json).map_err(|e| format!("{}: {e}", path.display()))
}

pub fn read_board(path: &Path) -> Result<Board, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    facet_json::from_str(&text).map_err(|e| format!("decode board {}: {e}", path.display()))
}

pub fn run(path: &Path) -> Result<(), String> {
    write_board(path, &initial_board())?;
    let board = read_board(path)?;
    println!("{board:?}");
    Ok(())
}
