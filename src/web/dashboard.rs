//! Static dashboard page.
//!
//! A single self-contained HTML page that polls /api/status every five
//! seconds. The api key comes from the `key` query parameter and is read
//! client-side, so the page itself is a plain static string.

use axum::response::Html;

/// Serve the dashboard.
pub async fn dashboard_page() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>FXPulse</title>
    <style>
        body { font-family: Arial, sans-serif; background:#f5f7fa; margin:0; padding:0; }
        .header { background:#003366; color:#fff; padding:12px; font-size:20px; font-weight:bold; }
        .account-card {
            background:#fff; margin:15px; padding:20px; border-radius:8px;
            box-shadow:0 2px 5px rgba(0,0,0,0.2);
        }
        .row { display:flex; flex-wrap:wrap; align-items:center; margin-bottom:15px; gap:20px; }
        .big-red { color:#c00; font-size:22px; font-weight:bold; }
        .big-green { color:#060; font-size:22px; font-weight:bold; }
        .tile-row { display:flex; gap:15px; margin-bottom:15px; }
        .tile {
            flex:1; background:#1976d2; color:#fff; padding:15px; text-align:center;
            border-radius:6px; font-size:20px; font-weight:bold;
        }
        .symbols-grid {
            display:grid; grid-template-columns: repeat(auto-fit, minmax(120px, 1fr));
            gap:10px;
        }
        .symbol {
            border-radius:6px; text-align:center; font-weight:bold; padding:6px;
            color:#000;
        }
        .symbol.green  { background-color:#4CAF50; }
        .symbol.yellow { background-color:#FFC107; }
        .symbol.orange { background-color:#FF9800; }
        .symbol.red    { background-color:#F44336; }
        .symbol-name { font-size:14px; margin-bottom:4px; }
        .price-box {
            background:#111; color:#fff;
            padding:4px; font-size:16px; font-weight:bold;
            margin-bottom:4px; border-radius:4px;
        }
        .dd { font-size:14px; margin-bottom:4px; }
        .stat-small { font-size:12px; font-weight:normal; }
        .footer { margin-top:15px; font-size:12px; color:#555; text-align:center; }
    </style>
</head>
<body>
    <div class="header">📊 FXPulse</div>
    <div id="content">Loading...</div>
    <script>
        const apiKey = new URLSearchParams(window.location.search).get("key") || "";
        async function loadData() {
            let res = await fetch('/api/status', { headers: {"X-API-KEY": apiKey} });
            if (!res.ok) {
                document.getElementById("content").innerHTML = "Auth error. Check the ?key= parameter.";
                return;
            }
            let data = await res.json();

            let html = "";
            for (let acc of data) {
                html += `<div class="account-card">
                    <div class="row">
                        <div><b>Account:</b> ${acc.account_name}</div>
                        <div class="${acc.drawdown > 0 ? 'big-red' : 'big-green'}">Drawdown: ${acc.drawdown.toFixed(2)}%</div>
                        <div class="big-green">Margin: ${acc.margin_level?.toFixed(2) ?? "-"}%</div>
                    </div>
                    <div class="tile-row">
                        <div class="tile">Balance<br>${acc.balance?.toFixed(2) ?? "-"}</div>
                        <div class="tile">Equity<br>${acc.equity?.toFixed(2) ?? "-"}</div>
                    </div>
                    <div class="row">
                        <div>Day: <b>${acc.pnl_daily?.toFixed(2) ?? "-"}</b></div>
                    </div>`;

                if (acc.symbols && acc.symbols.length > 0) {
                    html += `<div class="symbols-grid">`;
                    for (let s of acc.symbols) {
                        let cls = "symbol green";
                        if (s.dd_percent <= -25) cls = "symbol red";
                        else if (s.dd_percent <= -10) cls = "symbol orange";
                        else if (s.dd_percent < -1) cls = "symbol yellow";

                        html += `<div class="${cls}">
                            <div class="symbol-name">${s.symbol}</div>
                            <div class="price-box">${s.price.toFixed(5)}</div>
                            <div class="dd">${s.dd_percent.toFixed(2)}%</div>
                            <div class="stat-small">▲ ${s.buy_lots.toFixed(2)} (${s.buy_count})</div>
                            <div class="stat-small">▼ ${s.sell_lots.toFixed(2)} (${s.sell_count})</div>
                        </div>`;
                    }
                    html += `</div>`;
                } else {
                    html += `<div>no open positions</div>`;
                }

                html += `<div class="footer">Updated: ${acc.last_seen ? new Date(acc.last_seen).toLocaleString() : "-"}</div>
                </div>`;
            }
            document.getElementById("content").innerHTML = html;
        }
        setInterval(loadData, 5000);
        loadData();
    </script>
</body>
</html>
"#;
