/*!

This is the long-form manual for `credit_ledger` and `creditboard`.

## Credits

Every player receives a budget of 100 credits. A vote gives a signed weight to a character:
positive weights push the character up, negative weights push it down. Both consume credits:
a player holding `{A: 30, B: -20}` has spent 50 credits and may still distribute 50.

A player changes a weight by a delta (usually `+1` or `-1`). The change is accepted when:

- it withdraws an existing vote, i.e. the delta has the opposite sign of the current weight.
  This is always possible, even when no credit is left;
- or the remaining credits cover the absolute value of the delta.

A withdrawal that goes past zero (from `5` to `-3`) is accepted as long as the player stays
within the budget. A weight brought back to exactly zero is removed: the player is then
considered to have never voted for this character.

There is no lower bound on the weights other than the budget. In particular, weights are
not clamped at zero.

## Rankings

The total score of a character is the sum of the weights of all the players. The ranking lists:

1. the characters that received at least one vote, in the order they were first encountered
   (players in registration order, then the votes of each player in the order they were cast),
2. the registered characters nobody voted for, in registration order,

sorted by decreasing score. Characters with the same score keep the order above.

The ranking can alternatively be sorted by the weights of the selected player. The group score
is still reported for every row.

The favorite of a player is the character with the highest weight, the least favorite the one
with the lowest weight. A player without votes has no favorite.

## Stores

`creditboard` keeps the players, characters, votes and the allocation log in a store. The
following providers are supported:

* `json` a single JSON document, rewritten after each change
* `sqlite` a SQLite database file
* `memory` nothing is persisted; useful for trying things out

Operations touching several players (`reset`, `withdraw`) write the players one after the other.
If one write fails, the players before it keep their new allocations and the players after it
are left untouched. The failing player is reported.

## Configuration

`creditboard` accepts a configuration file in JSON:

```json
{
  "boardName": "Season 1 character ranking",
  "store": { "provider": "sqlite", "filePath": "board.sqlite" },
  "rules": { "writePath": "allocate", "logLimit": 20 }
}
```

- `store.provider` (string): `json`, `sqlite` or `memory`.
- `store.filePath` (string, optional): relative paths are resolved from the directory of the
  configuration file.
- `rules.writePath` (string, optional): `readModifyWrite` (default) computes the new
  allocations locally and writes them back. `allocate` sends the delta to the store, which
  validates it again and records it in the allocation log.
- `rules.logLimit` (string or number, optional): number of log entries shown (default 50).

The `--store` and `--path` flags override the configuration file.

 */
